//! The Context tree: per-invocation execution state.

use crate::datastore::DataStore;
use crate::error::CoreError;
use crate::event::{kind, Event, EventFilter, Timestamp};
use crate::id::ContextId;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Turn on (or off) the process-wide debug data scope. While disabled,
/// every read/write against [`Context::debug`] is silently dropped.
pub fn set_debug_enabled(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether the debug data scope is currently active.
pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}

/// What kind of thing a [`Context`] is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachedKind {
    /// An ordinary `Tool`.
    Tool,
    /// An `Agent` (a Tool whose body is prepare/llm/extract).
    Agent,
    /// A flow combinator (`Linear`, `DoWhile`, `ParallelList`, ...).
    Flow,
    /// An `Llm` backend.
    Llm,
}

/// The tool/agent/llm a context represents, set at most once.
#[derive(Debug, Clone)]
pub struct Attached {
    /// What kind of thing this is.
    pub kind: AttachedKind,
    /// Its stable id.
    pub id: String,
    /// Its human-readable name.
    pub name: String,
}

/// Lifecycle status computed from a context's terminal fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Neither `output` nor `exception` is set, and the context was not
    /// cancelled.
    Running,
    /// `output` is set.
    Complete,
    /// `exception` is set.
    Error,
    /// The context was cancelled before completing.
    Cancelled,
}

impl Status {
    /// The lowercase string used in `to_json` (and by the original Python
    /// implementation's `status` property).
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Complete => "complete",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
struct SimpleError(String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SimpleError {}

/// A terminal error value recorded on a [`Context`].
///
/// Wraps an arbitrary `std::error::Error`, cloneable so the same exception
/// can be handed to multiple lifecycle listeners and also surfaced from
/// `to_json`.
#[derive(Clone)]
pub struct ContextException(Arc<dyn std::error::Error + Send + Sync>);

impl ContextException {
    /// Wrap any error type.
    pub fn new<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self(Arc::new(error))
    }

    /// Build an exception carrying only a message (used when reconstructing
    /// from `from_json`, where the original error type is long gone).
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(SimpleError(message.into()))
    }

    /// The error's formatted message, as recorded in `to_json`'s `error`
    /// field.
    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for ContextException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextException({})", self.0)
    }
}

impl fmt::Display for ContextException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Terminal {
    output: Option<Value>,
    exception: Option<ContextException>,
    cancelled: bool,
}

type EventListener = Arc<dyn Fn(Context, Event) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    propagating: HashMap<String, Vec<EventListener>>,
    filtered: HashMap<String, Vec<EventListener>>,
}

#[derive(Default)]
struct Lifecycle {
    on_output: Vec<Arc<dyn Fn(Context, Value) + Send + Sync>>,
    on_exception: Vec<Arc<dyn Fn(Context, ContextException) + Send + Sync>>,
    on_end: Vec<Arc<dyn Fn(Context) + Send + Sync>>,
}

struct ContextInner {
    id: ContextId,
    parent: Option<Weak<ContextInner>>,
    root: OnceLock<Weak<ContextInner>>,
    attached: Mutex<Option<Attached>>,
    executing: AtomicBool,
    args: OnceLock<Value>,
    terminal: Mutex<Terminal>,
    created_at: Timestamp,
    children: Mutex<Vec<Context>>,
    history: Mutex<Vec<Event>>,
    listeners: Mutex<ListenerTable>,
    lifecycle: Mutex<Lifecycle>,
    local_data: DataStore,
    x_data: DataStore,
    debug_data: DataStore,
    completion: Notify,
}

/// A per-invocation state node: id, parent/root/children, args, output,
/// exception, data scopes, listeners, and a completion signal.
///
/// Cheap to clone — it is a handle (`Arc`) onto shared state, not a
/// by-value state struct passed around by reference.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

/// Dispatch `f` on the process's worker pool (the current Tokio runtime, if
/// any), isolating panics so a broken listener can never affect the
/// broadcaster.
fn spawn_dispatch(f: impl FnOnce() + Send + 'static) {
    let guarded = move || {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
            tracing::warn!("listener panicked; broadcast continues");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { guarded() });
        }
        Err(_) => {
            tracing::debug!("no tokio runtime reachable; running listener inline");
            guarded();
        }
    }
}

impl Context {
    /// Create a fresh, unattached root context.
    pub fn new() -> Self {
        Self::new_root(ContextId::new())
    }

    fn new_root(id: ContextId) -> Self {
        let inner = Arc::new_cyclic(|weak_self| {
            let root = OnceLock::new();
            let _ = root.set(weak_self.clone());
            ContextInner {
                id,
                parent: None,
                root,
                attached: Mutex::new(None),
                executing: AtomicBool::new(false),
                args: OnceLock::new(),
                terminal: Mutex::new(Terminal::default()),
                created_at: Timestamp::now(),
                children: Mutex::new(Vec::new()),
                history: Mutex::new(Vec::new()),
                listeners: Mutex::new(ListenerTable::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                local_data: DataStore::new(),
                x_data: DataStore::new(),
                debug_data: DataStore::new(),
                completion: Notify::new(),
            }
        });
        Context(inner)
    }

    fn new_child(parent: &Context, id: ContextId) -> Self {
        let parent_weak = Arc::downgrade(&parent.0);
        let root_weak = parent
            .0
            .root
            .get()
            .cloned()
            .unwrap_or_else(|| parent_weak.clone());
        let root = OnceLock::new();
        let _ = root.set(root_weak);
        let inner = Arc::new(ContextInner {
            id,
            parent: Some(parent_weak),
            root,
            attached: Mutex::new(None),
            executing: AtomicBool::new(false),
            args: OnceLock::new(),
            terminal: Mutex::new(Terminal::default()),
            created_at: Timestamp::now(),
            children: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            listeners: Mutex::new(ListenerTable::default()),
            lifecycle: Mutex::new(Lifecycle::default()),
            local_data: DataStore::new(),
            x_data: DataStore::new(),
            debug_data: DataStore::new(),
            completion: Notify::new(),
        });
        let child = Context(inner);
        parent.0.children.lock().unwrap().push(child.clone());
        child
    }

    /// Derive a new child context, appended to this context's `children`.
    pub fn child_context(&self) -> Context {
        let child = Context::new_child(self, ContextId::new());
        self.broadcast(Event::new(
            kind::CHILD_CONTEXT_CREATED,
            json!({ "child_id": child.id().to_string() }),
        ));
        child
    }

    /// This context's process-unique id.
    pub fn id(&self) -> ContextId {
        self.0.id
    }

    /// The immediate parent, if any.
    pub fn parent(&self) -> Option<Context> {
        self.0.parent.as_ref().and_then(|w| w.upgrade()).map(Context)
    }

    /// The root of this context's tree (itself, if this is already a root).
    ///
    /// Cached lazily at construction: resolving it is a
    /// single `Weak::upgrade`, never a parent-chain walk.
    pub fn root(&self) -> Context {
        match self.0.root.get() {
            Some(weak) => weak
                .upgrade()
                .map(Context)
                .unwrap_or_else(|| self.clone()),
            None => self.clone(),
        }
    }

    /// Snapshot of the current children (a context may gain more children
    /// after this call returns).
    pub fn children(&self) -> Vec<Context> {
        self.0.children.lock().unwrap().clone()
    }

    /// When this context was created.
    pub fn created_at(&self) -> Timestamp {
        self.0.created_at
    }

    /// Assign what this context represents. Fails if already attached.
    pub fn attach(
        &self,
        kind: AttachedKind,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(), CoreError> {
        let mut guard = self.0.attached.lock().unwrap();
        if let Some(existing) = guard.as_ref() {
            return Err(CoreError::AlreadyAttached(existing.name.clone()));
        }
        *guard = Some(Attached {
            kind,
            id: id.into(),
            name: name.into(),
        });
        Ok(())
    }

    /// What this context is attached to, if anything.
    pub fn attached(&self) -> Option<Attached> {
        self.0.attached.lock().unwrap().clone()
    }

    /// Attempt the `executing` latch's one-shot false→true transition.
    /// Returns `true` if this call performed the transition, `false` if it
    /// was already executing.
    pub fn try_start_executing(&self) -> bool {
        !self.0.executing.swap(true, Ordering::SeqCst)
    }

    /// Whether this context has begun executing.
    pub fn is_executing(&self) -> bool {
        self.0.executing.load(Ordering::SeqCst)
    }

    /// Assign `args`. Fails if already assigned — `args` may be set at
    /// most once per context.
    pub fn set_args(&self, args: Value) -> Result<(), CoreError> {
        self.0.args.set(args).map_err(|_| CoreError::ArgsAlreadySet)
    }

    /// The args captured at invocation, if assigned.
    pub fn args(&self) -> Option<Value> {
        self.0.args.get().cloned()
    }

    /// Assign the terminal output. Fails if a terminal value is already
    /// set.
    pub fn set_output(&self, value: Value) -> Result<(), CoreError> {
        {
            let mut terminal = self.0.terminal.lock().unwrap();
            if terminal.output.is_some() || terminal.exception.is_some() {
                return Err(CoreError::AlreadyTerminal("output"));
            }
            terminal.output = Some(value.clone());
        }
        self.0.completion.notify_waiters();
        self.dispatch_on_output(value);
        self.dispatch_on_end();
        Ok(())
    }

    /// Assign the terminal exception. Fails if a terminal value is already
    /// set. Implicitly broadcasts a `ToolException` event — callers never
    /// need to broadcast it themselves.
    pub fn set_exception(&self, exception: ContextException) -> Result<(), CoreError> {
        {
            let mut terminal = self.0.terminal.lock().unwrap();
            if terminal.output.is_some() || terminal.exception.is_some() {
                return Err(CoreError::AlreadyTerminal("exception"));
            }
            terminal.exception = Some(exception.clone());
        }
        self.0.completion.notify_waiters();
        self.broadcast(Event::new(
            kind::TOOL_EXCEPTION,
            json!({ "error": exception.message() }),
        ));
        self.dispatch_on_exception(exception);
        self.dispatch_on_end();
        Ok(())
    }

    /// Current status, computed live from the terminal fields.
    pub fn status(&self) -> Status {
        let terminal = self.0.terminal.lock().unwrap();
        if terminal.exception.is_some() {
            Status::Error
        } else if terminal.output.is_some() {
            Status::Complete
        } else if terminal.cancelled {
            Status::Cancelled
        } else {
            Status::Running
        }
    }

    /// The recorded output, if the context completed successfully.
    pub fn output(&self) -> Option<Value> {
        self.0.terminal.lock().unwrap().output.clone()
    }

    /// The recorded exception, if the context failed.
    pub fn exception(&self) -> Option<ContextException> {
        self.0.terminal.lock().unwrap().exception.clone()
    }

    fn is_terminal(&self) -> bool {
        let t = self.0.terminal.lock().unwrap();
        t.output.is_some() || t.exception.is_some() || t.cancelled
    }

    /// Cancellation is not implemented at this layer: nothing in this
    /// workspace needs to cancel a bare `Context` directly — `ParallelList`
    /// cancels its own child futures without going through this method.
    pub fn cancel(&self) -> Result<(), CoreError> {
        Err(CoreError::NotImplemented("Context::cancel"))
    }

    /// Block (asynchronously) until this context reaches a terminal state,
    /// or until `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), CoreError> {
        loop {
            if self.is_terminal() {
                return Ok(());
            }
            let notified = self.0.completion.notified();
            // Re-check after constructing the Notified future to avoid the
            // classic check/notify race: notify_waiters() only wakes
            // futures registered before it fires.
            if self.is_terminal() {
                return Ok(());
            }
            match timeout {
                Some(d) => {
                    tokio::time::timeout(d, notified)
                        .await
                        .map_err(|_| CoreError::Timeout)?;
                }
                None => notified.await,
            }
        }
    }

    /// A write-once future satisfied with `output` on success or
    /// `exception` on failure. Requesting one after completion yields an
    /// already-satisfied future.
    pub fn future(&self) -> Pin<Box<dyn Future<Output = Result<Value, ContextException>> + Send>> {
        let ctx = self.clone();
        Box::pin(async move {
            let _ = ctx.wait(None).await;
            let terminal = ctx.0.terminal.lock().unwrap();
            if let Some(exception) = &terminal.exception {
                Err(exception.clone())
            } else if let Some(output) = &terminal.output {
                Ok(output.clone())
            } else {
                Err(ContextException::from_message(
                    "context reached a terminal state with neither output nor exception",
                ))
            }
        })
    }

    /// Wipe `output`/`exception` (and optionally `children`), re-arm the
    /// completion signal, and reset the `executing` latch to `executing`.
    /// `args` and data scopes are preserved. Used exclusively by
    /// combinators' `retry` paths.
    pub fn clear(&self, executing: bool, clear_children: bool) {
        *self.0.terminal.lock().unwrap() = Terminal::default();
        self.0.executing.store(executing, Ordering::SeqCst);
        if clear_children {
            self.0.children.lock().unwrap().clear();
        }
    }

    // --- Local data scope -------------------------------------------------

    /// Read from the local (this-context-only) data scope.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.local_data.get(key)
    }

    /// Read from the local scope, or `default` if absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.0.local_data.get_or(key, default)
    }

    /// Write to the local scope.
    pub fn set(&self, key: &str, value: Value) {
        self.0.local_data.set(key, value);
    }

    /// Whether `key` resolves in the local scope.
    pub fn contains(&self, key: &str) -> bool {
        self.0.local_data.contains(key)
    }

    /// Remove `key` from the local scope.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.0.local_data.delete(key)
    }

    /// `init` against the local scope.
    pub fn init(&self, key: &str, value: Value) -> Value {
        self.0.local_data.init(key, value)
    }

    /// `update` against the local scope.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<Value>) -> Value) -> Value {
        self.0.local_data.update(key, f)
    }

    /// `increment` against the local scope.
    pub fn increment(&self, key: &str, n: i64) -> i64 {
        self.0.local_data.increment(key, n)
    }

    /// `decrement` against the local scope.
    pub fn decrement(&self, key: &str, n: i64) -> i64 {
        self.0.local_data.decrement(key, n)
    }

    /// `append` against the local scope.
    pub fn append(&self, key: &str, value: Value) {
        self.0.local_data.append(key, value);
    }

    /// `concat` against the local scope.
    pub fn concat(&self, key: &str, value: Value) {
        self.0.local_data.concat(key, value);
    }

    /// `operate` against the local scope.
    pub fn operate(&self, keys: &[&str], f: impl FnOnce(&mut HashMap<String, Value>)) {
        self.0.local_data.operate(keys, f);
    }

    /// The execution-wide scope (`ctx.x`): physically stored on `root()`,
    /// visible to the whole tree.
    pub fn x(&self) -> Scope {
        Scope {
            owner: self.root(),
            kind: ScopeKind::Execution,
        }
    }

    /// The debug scope (`ctx.debug`): silently dropped unless
    /// [`set_debug_enabled`] is on.
    pub fn debug(&self) -> Scope {
        Scope {
            owner: self.clone(),
            kind: ScopeKind::Debug,
        }
    }

    // --- Events -------------------------------------------------------

    /// Register a listener. `ignore_children` registers it in the filtered
    /// table (own events only); otherwise it goes in the propagating table
    /// (own events plus everything bubbled up from descendants).
    pub fn on_event(
        &self,
        filter: impl Into<EventFilter>,
        ignore_children: bool,
        listener: impl Fn(Context, Event) + Send + Sync + 'static,
    ) {
        let arc: EventListener = Arc::new(listener);
        let mut table = self.0.listeners.lock().unwrap();
        let map = if ignore_children {
            &mut table.filtered
        } else {
            &mut table.propagating
        };
        map.entry(filter.into().key().to_string())
            .or_default()
            .push(arc);
    }

    /// Register a listener that fires when this context's output is set.
    pub fn on_output(&self, f: impl Fn(Context, Value) + Send + Sync + 'static) {
        self.0.lifecycle.lock().unwrap().on_output.push(Arc::new(f));
    }

    /// Register a listener that fires when this context's exception is set.
    pub fn on_exception(&self, f: impl Fn(Context, ContextException) + Send + Sync + 'static) {
        self.0
            .lifecycle
            .lock()
            .unwrap()
            .on_exception
            .push(Arc::new(f));
    }

    /// Register a listener that fires once this context reaches any
    /// terminal state.
    pub fn on_end(&self, f: impl Fn(Context) + Send + Sync + 'static) {
        self.0.lifecycle.lock().unwrap().on_end.push(Arc::new(f));
    }

    /// Broadcast an event as if it originated on this context.
    pub fn broadcast(&self, event: Event) {
        self.broadcast_from(event, self.clone());
    }

    fn broadcast_from(&self, event: Event, source: Context) {
        let is_own = source.id() == self.id();
        if is_own {
            self.0.history.lock().unwrap().push(event.clone());
        }
        {
            let table = self.0.listeners.lock().unwrap();
            Self::fire(&table.propagating, &event, &source);
            if is_own {
                Self::fire(&table.filtered, &event, &source);
            }
        }
        if let Some(parent) = self.parent() {
            parent.broadcast_from(event, source);
        }
    }

    fn fire(table: &HashMap<String, Vec<EventListener>>, event: &Event, source: &Context) {
        for key in [event.event_type.as_str(), kind::ALL] {
            if key == kind::ALL && event.event_type == kind::ALL {
                // avoid double-dispatching when someone literally names
                // their event "all"
                continue;
            }
            if let Some(listeners) = table.get(key) {
                for listener in listeners {
                    let listener = listener.clone();
                    let source = source.clone();
                    let event = event.clone();
                    spawn_dispatch(move || listener(source, event));
                }
            }
        }
    }

    fn dispatch_on_output(&self, value: Value) {
        let listeners = self.0.lifecycle.lock().unwrap().on_output.clone();
        for listener in listeners {
            let ctx = self.clone();
            let value = value.clone();
            spawn_dispatch(move || listener(ctx, value));
        }
    }

    fn dispatch_on_exception(&self, exception: ContextException) {
        let listeners = self.0.lifecycle.lock().unwrap().on_exception.clone();
        for listener in listeners {
            let ctx = self.clone();
            let exception = exception.clone();
            spawn_dispatch(move || listener(ctx, exception));
        }
    }

    fn dispatch_on_end(&self) {
        let listeners = self.0.lifecycle.lock().unwrap().on_end.clone();
        for listener in listeners {
            let ctx = self.clone();
            spawn_dispatch(move || listener(ctx));
        }
    }

    /// This context's own history (events broadcast with itself as
    /// source), in append order.
    pub fn history(&self) -> Vec<Event> {
        self.0.history.lock().unwrap().clone()
    }

    // --- Snapshotting ---------------------------------------------------

    /// Deterministic JSON snapshot.
    ///
    /// Listeners and worker pools are never serialized. The execution
    /// scope (`x`) is only included for root contexts, under its own `x`
    /// key.
    pub fn to_json(&self) -> Value {
        let terminal = self.0.terminal.lock().unwrap();
        let attached = self.attached();
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), json!(self.id().to_string()));
        obj.insert(
            "parent_id".into(),
            self.parent()
                .map(|p| json!(p.id().to_string()))
                .unwrap_or(Value::Null),
        );
        obj.insert("root_id".into(), json!(self.root().id().to_string()));
        obj.insert(
            "tool_id".into(),
            attached
                .as_ref()
                .map(|a| json!(a.id.clone()))
                .unwrap_or(Value::Null),
        );
        obj.insert(
            "tool_name".into(),
            attached
                .as_ref()
                .map(|a| json!(a.name.clone()))
                .unwrap_or(Value::Null),
        );
        obj.insert("status".into(), json!(self.status().as_str()));
        obj.insert("args".into(), self.args().unwrap_or(Value::Null));
        obj.insert("output".into(), terminal.output.clone().unwrap_or(Value::Null));
        let history: Vec<Value> = self
            .0
            .history
            .lock()
            .unwrap()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        obj.insert("history".into(), Value::Array(history));
        obj.insert("created_at".into(), serde_json::to_value(self.0.created_at).unwrap_or(Value::Null));
        let children: Vec<Value> = self
            .0
            .children
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.to_json())
            .collect();
        obj.insert("children".into(), Value::Array(children));
        obj.insert(
            "error".into(),
            terminal
                .exception
                .as_ref()
                .map(|e| json!(e.message()))
                .unwrap_or(Value::Null),
        );
        obj.insert("data".into(), self.0.local_data.to_json());
        if self.parent().is_none() {
            obj.insert("x".into(), self.0.x_data.to_json());
        }
        Value::Object(obj)
    }

    /// Reconstruct a (detached, listener-free) context tree from a
    /// snapshot produced by `to_json`. A context that had terminated is
    /// reconstructed already-terminal.
    pub fn from_json(value: &Value) -> Result<Context, CoreError> {
        Self::from_json_with_parent(value, None)
    }

    fn from_json_with_parent(value: &Value, parent: Option<&Context>) -> Result<Context, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::Other("context snapshot is not a JSON object".into()))?;
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| ContextId::parse(s).ok())
            .unwrap_or_default();
        let ctx = match parent {
            Some(p) => Context::new_child(p, id),
            None => Context::new_root(id),
        };
        if let Some(args) = obj.get("args") {
            if !args.is_null() {
                let _ = ctx.set_args(args.clone());
            }
        }
        if let Some(data) = obj.get("data").and_then(|d| d.as_object()) {
            for (k, v) in data {
                ctx.0.local_data.set(k, v.clone());
            }
        }
        if let Some(x) = obj.get("x").and_then(|d| d.as_object()) {
            for (k, v) in x {
                ctx.0.x_data.set(k, v.clone());
            }
        }
        if let Some(history) = obj.get("history").and_then(|h| h.as_array()) {
            let mut guard = ctx.0.history.lock().unwrap();
            for raw in history {
                if let Ok(event) = serde_json::from_value::<Event>(raw.clone()) {
                    guard.push(event);
                }
            }
        }
        match obj.get("status").and_then(|s| s.as_str()) {
            Some("complete") => {
                let _ = ctx.set_output(obj.get("output").cloned().unwrap_or(Value::Null));
            }
            Some("error") => {
                let message = obj
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                let _ = ctx.set_exception(ContextException::from_message(message));
            }
            Some("cancelled") => {
                ctx.0.terminal.lock().unwrap().cancelled = true;
            }
            _ => {}
        }
        if let Some(children) = obj.get("children").and_then(|c| c.as_array()) {
            for child in children {
                Self::from_json_with_parent(child, Some(&ctx))?;
            }
        }
        Ok(ctx)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

enum ScopeKind {
    Execution,
    Debug,
}

/// A handle onto one of a context's non-local data scopes (`x` or
/// `debug`), obtained via [`Context::x`] / [`Context::debug`].
pub struct Scope {
    owner: Context,
    kind: ScopeKind,
}

impl Scope {
    fn store(&self) -> Option<&DataStore> {
        match self.kind {
            ScopeKind::Execution => Some(&self.owner.0.x_data),
            ScopeKind::Debug => {
                if debug_enabled() {
                    Some(&self.owner.0.debug_data)
                } else {
                    None
                }
            }
        }
    }

    /// Read a value from this scope.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store().and_then(|s| s.get(key))
    }

    /// Read a value from this scope, or `default` if absent (or dropped).
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        match self.store() {
            Some(s) => s.get_or(key, default),
            None => default,
        }
    }

    /// Write a value into this scope.
    pub fn set(&self, key: &str, value: Value) {
        if let Some(s) = self.store() {
            s.set(key, value);
        }
    }

    /// Whether `key` resolves in this scope.
    pub fn contains(&self, key: &str) -> bool {
        self.store().map(|s| s.contains(key)).unwrap_or(false)
    }

    /// Remove `key` from this scope.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.store().and_then(|s| s.delete(key))
    }

    /// `init` against this scope.
    pub fn init(&self, key: &str, value: Value) -> Value {
        match self.store() {
            Some(s) => s.init(key, value),
            None => value,
        }
    }

    /// `update` against this scope.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<Value>) -> Value) -> Value {
        match self.store() {
            Some(s) => s.update(key, f),
            None => f(None),
        }
    }

    /// `increment` against this scope.
    pub fn increment(&self, key: &str, n: i64) -> i64 {
        self.store().map(|s| s.increment(key, n)).unwrap_or(0)
    }

    /// `decrement` against this scope.
    pub fn decrement(&self, key: &str, n: i64) -> i64 {
        self.store().map(|s| s.decrement(key, n)).unwrap_or(0)
    }

    /// `append` against this scope.
    pub fn append(&self, key: &str, value: Value) {
        if let Some(s) = self.store() {
            s.append(key, value);
        }
    }

    /// `concat` against this scope.
    pub fn concat(&self, key: &str, value: Value) {
        if let Some(s) = self.store() {
            s.concat(key, value);
        }
    }

    /// `operate` against this scope.
    pub fn operate(&self, keys: &[&str], f: impl FnOnce(&mut HashMap<String, Value>)) {
        if let Some(s) = self.store() {
            s.operate(keys, f);
        }
    }
}
