//! Repeat-until-condition combinator.

use crate::error::FlowError;
use agentflow_core::{Argument, Context};
use agentflow_tool::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Default cap on iterations when the caller doesn't override it, matching
/// `IterativeAgent`'s own default step budget.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

type ArgsFn = Box<dyn Fn(&Context, &Value) -> Value + Send + Sync>;
type StopFn = Box<dyn Fn(&Context, &Value) -> bool + Send + Sync>;
type OutputFn = Box<dyn Fn(&Context, &Value) -> Value + Send + Sync>;
type StateFn = Box<dyn Fn(&Context, &Value) -> Value + Send + Sync>;

/// Repeatedly calls a single inner [`Tool`], deriving each iteration's
/// arguments from the running context until `stop_condition` is satisfied
/// or `max_iterations` is reached.
pub struct DoWhile {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    tool: Arc<dyn Tool>,
    prepare_args: ArgsFn,
    stop_condition: StopFn,
    format_output: Option<OutputFn>,
    initial_state: Option<StateFn>,
    max_iterations: usize,
}

impl DoWhile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        tool: Arc<dyn Tool>,
        prepare_args: ArgsFn,
        stop_condition: StopFn,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            tool,
            prepare_args,
            stop_condition,
            format_output: None,
            initial_state: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Shapes the loop's final return value from the last iteration's
    /// output. Omitted, the last iteration's raw output is returned.
    pub fn with_format_output(mut self, f: OutputFn) -> Self {
        self.format_output = Some(f);
        self
    }

    /// Seeds local context data once, before the first iteration, from the
    /// call's own `kwargs`.
    pub fn with_initial_state(mut self, f: StateFn) -> Self {
        self.initial_state = Some(f);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    async fn run_loop(
        &self,
        ctx: &Context,
        original_kwargs: &Value,
        mut resume_args: Option<Value>,
    ) -> Result<Value, FlowError> {
        let mut last_output = ctx
            .get("outputs")
            .and_then(|v| v.as_array().and_then(|a| a.last().cloned()))
            .unwrap_or(Value::Null);
        loop {
            let next_args = match resume_args.take() {
                Some(a) => a,
                None => {
                    let iteration = ctx.increment("iteration", 1);
                    if iteration as usize > self.max_iterations {
                        tracing::warn!(
                            flow = %self.name,
                            max_iterations = self.max_iterations,
                            "do-while loop exceeded its iteration budget"
                        );
                        return Err(FlowError::MaxIterationsExceeded(self.max_iterations));
                    }
                    tracing::debug!(flow = %self.name, iteration, "do-while iteration");
                    let a = (self.prepare_args)(ctx, original_kwargs);
                    ctx.append("args", a.clone());
                    a
                }
            };
            let step_ctx = ctx.child_context();
            let out = self.tool.call(Some(step_ctx), next_args).await?;
            ctx.append("outputs", out.clone());
            last_output = out.clone();
            if (self.stop_condition)(ctx, &out) {
                break;
            }
        }
        Ok(match &self.format_output {
            Some(f) => f(ctx, &last_output),
            None => last_output,
        })
    }
}

#[async_trait]
impl Tool for DoWhile {
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
        if let Some(initial_state) = &self.initial_state {
            let state = initial_state(ctx, kwargs);
            if let Some(obj) = state.as_object() {
                for (k, v) in obj {
                    ctx.set(k, v.clone());
                }
            }
        }
        ctx.init("iteration", json!(0));
        ctx.init("outputs", json!([]));
        ctx.init("args", json!([]));
        self.run_loop(ctx, kwargs, None)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }

    async fn retry(&self, ctx: &Context) -> Result<Value, ToolError> {
        ctx.clear(true, false);
        let kwargs = ctx.args().unwrap_or_else(|| json!({}));
        let resume_args = ctx
            .get("args")
            .and_then(|v| v.as_array().and_then(|a| a.last().cloned()));
        self.run_loop(ctx, &kwargs, resume_args)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }
}
