//! Guard wrapper: substitute a fallback tool when the wrapped call fails
//! (SPEC_FULL.md §4.12, grounded on `arkaine.flow.on_error.OnError`).

use agentflow_core::{Argument, Context, ContextException, Example, ResultSchema};
use agentflow_tool::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

type ErrorFormatter = Box<dyn Fn(&Context, &ContextException) -> Value + Send + Sync>;

/// Runs `tool`; if it raises (or its own context records an exception
/// without one escaping), runs `on_error` instead, passing it the
/// exception (optionally reshaped by `on_error_formatter`). Composes with
/// [`crate::Linear`]/[`crate::DoWhile`] without interfering with their own
/// step/iteration bookkeeping — it only asks "did the wrapped call fail".
pub struct OnError {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    tool: Arc<dyn Tool>,
    on_error: Arc<dyn Tool>,
    on_error_formatter: Option<ErrorFormatter>,
    set_exception: bool,
}

impl OnError {
    pub fn new(tool: Arc<dyn Tool>, on_error: Arc<dyn Tool>) -> Self {
        let id = format!("{}::onerror", tool.id());
        let name = format!("{}::onerror", tool.name());
        let description = tool.description().to_string();
        let args = tool.args().to_vec();
        Self {
            id,
            name,
            description,
            args,
            tool,
            on_error,
            on_error_formatter: None,
            set_exception: false,
        }
    }

    /// Reshapes the exception into whatever input `on_error` expects.
    /// Without one, `on_error` receives the exception's display message.
    pub fn with_formatter(mut self, f: ErrorFormatter) -> Self {
        self.on_error_formatter = Some(f);
        self
    }

    /// When true, the wrapped tool's exception message is recorded under
    /// `ctx["on_error_exception"]` even though `on_error` goes on to
    /// produce a successful output (off by default: a handled failure
    /// isn't surfaced as one). A Context's terminal slot holds at most one
    /// of output/exception, so — unlike the Python original,
    /// which can freely overwrite `context.exception` as a plain
    /// attribute — the original failure can't be recorded in the terminal
    /// `exception` field alongside a successful `output`; the data-store
    /// key carries the same information without violating that invariant.
    pub fn with_set_exception(mut self, set_exception: bool) -> Self {
        self.set_exception = set_exception;
        self
    }
}

#[async_trait]
impl Tool for OnError {
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
    fn examples(&self) -> &[Example] {
        self.tool.examples()
    }
    fn result_schema(&self) -> Option<&ResultSchema> {
        self.tool.result_schema()
    }

    async fn invoke(&self, ctx: &Context, kwargs: &Value) -> Result<Value, ToolError> {
        let child_ctx = ctx.child_context();
        let result = self.tool.call(Some(child_ctx.clone()), kwargs.clone()).await;

        let exception = match &result {
            Ok(_) => child_ctx.exception(),
            Err(err) => Some(
                child_ctx
                    .exception()
                    .unwrap_or_else(|| ContextException::from_message(err.to_string())),
            ),
        };

        let Some(exception) = exception else {
            return result;
        };

        if self.set_exception {
            ctx.set("on_error_exception", json!(exception.message()));
        }
        let on_error_input = match &self.on_error_formatter {
            Some(f) => f(ctx, &exception),
            None => json!(exception.message()),
        };
        self.on_error.call(Some(ctx.child_context()), on_error_input).await
    }

    async fn retry(&self, ctx: &Context) -> Result<Value, ToolError> {
        ctx.clear(true, false);
        match ctx.children().into_iter().next() {
            Some(primary_child) => self.tool.retry(&primary_child).await,
            None => Err(ToolError::Other(
                "OnError has no prior child context to retry".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_tool::FnTool;

    fn always_fails() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            "flaky",
            "flaky",
            "always raises",
            vec![Argument::required("n", "input", "int")],
            |_ctx, _kwargs| Box::pin(async move { Err(ToolError::Other("boom".into())) }),
        ))
    }

    fn fallback() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            "fallback",
            "fallback",
            "returns a constant",
            vec![Argument::required("reason", "why the primary failed", "str")],
            |_ctx, kwargs| {
                Box::pin(async move { Ok(json!({ "fallback": true, "reason": kwargs["reason"] })) })
            },
        ))
    }

    #[tokio::test]
    async fn falls_back_to_the_error_handler_on_failure() {
        let wrapped = OnError::new(always_fails(), fallback())
            .with_formatter(Box::new(|_ctx, exception| json!({ "reason": exception.message() })));
        let out = wrapped.call(None, json!({ "n": 1 })).await.unwrap();
        assert_eq!(out["fallback"], json!(true));
        assert_eq!(out["reason"], json!("boom"));
    }

    #[tokio::test]
    async fn set_exception_records_the_original_failure_even_on_recovery() {
        let wrapped = OnError::new(always_fails(), fallback())
            .with_formatter(Box::new(|_ctx, exception| json!({ "reason": exception.message() })))
            .with_set_exception(true);
        let ctx = Context::new();
        let out = wrapped.call(Some(ctx.clone()), json!({ "n": 1 })).await.unwrap();
        assert_eq!(out["fallback"], json!(true));
        assert_eq!(ctx.get("on_error_exception"), Some(json!("boom")));
        // the call still completed successfully — the terminal slot holds
        // the recovered output, not the original exception.
        assert!(ctx.exception().is_none());
    }

    #[tokio::test]
    async fn passes_through_a_successful_call_untouched() {
        let succeeds: Arc<dyn Tool> = Arc::new(FnTool::new(
            "doubler",
            "doubler",
            "doubles n",
            vec![Argument::required("n", "input", "int")],
            |_ctx, kwargs| {
                Box::pin(async move { Ok(json!(kwargs["n"].as_i64().unwrap_or(0) * 2)) })
            },
        ));
        let wrapped = OnError::new(succeeds, fallback());
        let out = wrapped.call(None, json!({ "n": 3 })).await.unwrap();
        assert_eq!(out, json!(6));
    }
}
