//! The process-wide tool registrar.

use crate::tool::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

type Notification = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Process-wide registry of tools, plus a small notification bus used by
/// global stores (e.g. autosave) to observe "a tool was called"/"an LLM was
/// called" without coupling to every call site.
pub struct Registrar {
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
    listeners: Mutex<Vec<Notification>>,
    enabled: AtomicBool,
}

impl Registrar {
    /// Build a standalone registrar. Most callers want [`Registrar::global`].
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// The process-wide singleton.
    pub fn global() -> &'static Registrar {
        static INSTANCE: OnceLock<Registrar> = OnceLock::new();
        INSTANCE.get_or_init(Registrar::new)
    }

    /// Register a tool. Idempotent by id: re-registering the same id is a
    /// no-op and returns `false`.
    pub fn register(&self, tool: Arc<dyn Tool>) -> bool {
        let mut tools = self.tools.lock().unwrap();
        if tools.contains_key(tool.id()) {
            tracing::debug!(tool = %tool.id(), "tool already registered, skipping");
            false
        } else {
            tracing::debug!(tool = %tool.id(), "registered tool");
            tools.insert(tool.id().to_string(), tool);
            true
        }
    }

    /// Look up a registered tool by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().unwrap().get(id).cloned()
    }

    /// Every registered tool's id.
    pub fn tool_ids(&self) -> Vec<String> {
        self.tools.lock().unwrap().keys().cloned().collect()
    }

    /// Turn notification dispatch on. Registration/lookup are unaffected.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Turn notification dispatch off.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether notification dispatch is currently on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Subscribe to "tool-call"/"llm-call" notifications.
    pub fn on_notification(&self, f: impl Fn(&str, Value) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Arc::new(f));
    }

    /// Broadcast a notification (`"tool-call"`, `"llm-call"`, or any other
    /// tag callers agree on) to subscribers, on the worker pool. A no-op
    /// while disabled.
    pub fn notify(&self, tag: &str, payload: Value) {
        if !self.is_enabled() {
            tracing::debug!(tag, "notification dispatch disabled, dropping");
            return;
        }
        let listeners = self.listeners.lock().unwrap().clone();
        tracing::debug!(tag, listeners = listeners.len(), "dispatching notification");
        for listener in listeners {
            let tag = tag.to_string();
            let payload = payload.clone();
            let task = move || listener(&tag, payload);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { task() });
                }
                Err(_) => task(),
            }
        }
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{Argument, Context};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Noop(&'static str);

    #[async_trait]
    impl Tool for Noop {
        fn id(&self) -> &str {
            self.0
        }
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            ""
        }
        fn args(&self) -> &[Argument] {
            &[]
        }
        async fn invoke(&self, _ctx: &Context, _kwargs: &Value) -> Result<Value, crate::ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn register_is_idempotent_by_id() {
        let reg = Registrar::new();
        assert!(reg.register(Arc::new(Noop("a"))));
        assert!(!reg.register(Arc::new(Noop("a"))));
        assert_eq!(reg.tool_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn get_resolves_registered_tools() {
        let reg = Registrar::new();
        reg.register(Arc::new(Noop("x")));
        assert!(reg.get("x").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[tokio::test]
    async fn disable_suppresses_notifications() {
        let reg = Registrar::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        reg.on_notification(move |_tag, _payload| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        reg.notify("tool-call", json!({"id": "a"}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        reg.disable();
        reg.notify("tool-call", json!({"id": "b"}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        reg.enable();
        reg.notify("tool-call", json!({"id": "c"}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
