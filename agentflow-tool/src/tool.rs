//! The Tool invocation protocol.
//!
//! The original spec describes several call shapes (`(ctx, kwargs)`,
//! `(ctx, positional..., kwargs...)`, `(kwargs...)` with a leading
//! Context-typed positional detected dynamically). Rust has no dynamically
//! typed positional arguments, so every shape collapses to the one Rust can
//! express directly and statically: an optional [`Context`] plus a single
//! `kwargs` object. Callers who held several Python call shapes in mind
//! should read "bundle everything into one kwargs object" as the Rust
//! equivalent of "a single dict positional is treated as kwargs".

use crate::error::ToolError;
use agentflow_core::{
    fill_defaults, kind, validate, Argument, AttachedKind, Context, ContextException, Event,
    Example, ResultSchema,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A uniform, composable unit of work: an ordinary function, an LLM-driven
/// agent, or a flow combinator, invoked under a shared [`Context`].
///
/// Implementors provide [`Tool::invoke`]; `call`, `async_call`, and `retry`
/// are provided based on it and should not usually be overridden — flow
/// combinators override it to resume from a partially completed run instead
/// of replaying from scratch.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable id, used by the [`crate::Registrar`] and in `Context::attached`.
    fn id(&self) -> &str;

    /// Human-readable name, surfaced in events and `to_json`.
    fn name(&self) -> &str;

    /// What this tool does, for catalog/LLM-facing listings.
    fn description(&self) -> &str;

    /// The argument schema used for default-filling and validation.
    fn args(&self) -> &[Argument];

    /// Worked examples, if any. Empty by default.
    fn examples(&self) -> &[Example] {
        &[]
    }

    /// Documentation for the return value, if any.
    fn result_schema(&self) -> Option<&ResultSchema> {
        None
    }

    /// The tool's actual behavior, run with `kwargs` already
    /// default-filled and validated, and `ctx` already derived, attached,
    /// and marked executing.
    async fn invoke(&self, ctx: &Context, kwargs: &Value) -> Result<Value, ToolError>;

    /// Invoke this tool synchronously (from the caller's perspective):
    /// derive/attach/mark-executing the context, fill defaults, validate,
    /// run `invoke`, and record the outcome onto the context.
    async fn call(&self, ctx: Option<Context>, kwargs: Value) -> Result<Value, ToolError> {
        let ctx = derive_context(ctx, AttachedKind::Tool, self.id(), self.name())?;
        self.run_prepared(ctx, kwargs).await
    }

    /// Shared body of `call`/`retry`/`async_call`: assumes `ctx` has
    /// already been derived and marked executing.
    async fn run_prepared(&self, ctx: Context, kwargs: Value) -> Result<Value, ToolError> {
        let mut kwargs = if kwargs.is_null() { json!({}) } else { kwargs };
        let obj = kwargs
            .as_object_mut()
            .ok_or(ToolError::KwargsNotAnObject)?;
        fill_defaults(self.args(), obj);
        let validation = validate(self.args(), obj);
        if !validation.is_ok() {
            return Err(ToolError::InvalidArguments {
                missing_required: validation.missing_required,
                extraneous: validation.extraneous,
            });
        }
        if ctx.args().is_none() {
            let _ = ctx.set_args(kwargs.clone());
        }
        ctx.broadcast(Event::new(
            kind::TOOL_CALLED,
            json!({ "tool": self.name(), "args": kwargs }),
        ));
        tracing::debug!(tool = %self.name(), "invoking tool");
        match self.invoke(&ctx, &kwargs).await {
            Ok(value) => {
                ctx.set_output(value.clone()).map_err(ToolError::Core)?;
                ctx.broadcast(Event::new(
                    kind::TOOL_RETURN,
                    json!({ "tool": self.name(), "output": value }),
                ));
                tracing::debug!(tool = %self.name(), "tool returned");
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(tool = %self.name(), error = %err, "tool failed");
                // Context::set_exception already broadcasts ToolException
                //.
                let _ = ctx.set_exception(ContextException::from_message(err.to_string()));
                Err(err)
            }
        }
    }

    /// Replay this tool against the same `ctx` after clearing its terminal
    /// state, reusing `ctx.args()`. Flow
    /// combinators (`Linear`, `DoWhile`, `ParallelList`) override this with
    /// their resumable variants.
    async fn retry(&self, ctx: &Context) -> Result<Value, ToolError> {
        tracing::debug!(tool = %self.name(), "retrying tool");
        ctx.clear(true, false);
        let kwargs = ctx.args().unwrap_or_else(|| json!({}));
        self.run_prepared(ctx.clone(), kwargs).await
    }
}

/// Run `tool` on a worker pool and return its context immediately. Exceptions
/// inside the background task are captured onto the returned context rather
/// than propagated here.
///
/// A free function rather than a `Tool` method: spawning requires a
/// `'static` owned handle to the tool, which an object-safe `&self` method
/// cannot provide without imposing `Arc<Self>` receivers on every
/// implementor.
pub async fn async_call(tool: Arc<dyn Tool>, ctx: Option<Context>, kwargs: Value) -> Context {
    let ctx = derive_context(ctx, AttachedKind::Tool, tool.id(), tool.name())
        .unwrap_or_else(|_| Context::new());
    let background_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = tool.run_prepared(background_ctx, kwargs).await;
    });
    ctx
}

/// Context derivation rule shared by `call`, `async_call`, agent
/// invocation, and the flow combinators that override `call` to accept
/// non-object input: if `ctx` is
/// already executing, derive a child attached to this tool; otherwise
/// attach this tool to `ctx` (creating one if absent) and mark it
/// executing.
pub fn derive_context(
    ctx: Option<Context>,
    kind: AttachedKind,
    id: &str,
    name: &str,
) -> Result<Context, ToolError> {
    let ctx = match ctx {
        Some(c) if c.is_executing() => c.child_context(),
        Some(c) => c,
        None => Context::new(),
    };
    if ctx.attached().is_none() {
        ctx.attach(kind, id, name)?;
    }
    ctx.try_start_executing();
    Ok(ctx)
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Wraps a plain async closure as a [`Tool`]. Since Rust closures don't
/// carry reflectable parameter lists, the `Argument` schema is supplied
/// explicitly at construction rather than inferred.
#[derive(Clone)]
pub struct FnTool {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    f: Arc<dyn Fn(Context, Value) -> BoxFuture<Result<Value, ToolError>> + Send + Sync>,
}

impl FnTool {
    /// Wrap `f` as a tool with the given id/name/description/schema.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        f: impl Fn(Context, Value) -> BoxFuture<Result<Value, ToolError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn args(&self) -> &[Argument] {
        &self.args
    }
    async fn invoke(&self, ctx: &Context, kwargs: &Value) -> Result<Value, ToolError> {
        (self.f)(ctx.clone(), kwargs.clone()).await
    }
}
