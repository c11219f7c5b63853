//! Sequential pipeline combinator.

use crate::error::FlowError;
use agentflow_core::{Argument, Context};
use agentflow_tool::{Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Runs a fixed sequence of [`Tool`]s, feeding each step's output to the
/// next step's input. Resumable: a context carrying `ctx["step"]` and
/// `ctx["args_by_step"]` from a prior partial run picks up where it left
/// off rather than re-running completed steps.
pub struct Linear {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    steps: Vec<Arc<dyn Tool>>,
}

impl Linear {
    /// `args` defaults to the first step's argument schema when omitted,
    /// since that is what a caller of the pipeline actually supplies.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Arc<dyn Tool>>,
        args: Option<Vec<Argument>>,
    ) -> Self {
        let args = args.unwrap_or_else(|| steps.first().map(|s| s.args().to_vec()).unwrap_or_default());
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            steps,
        }
    }

    fn args_by_step_entry(ctx: &Context, index: usize) -> Option<Value> {
        ctx.get("args_by_step")
            .and_then(|v| v.as_object().and_then(|o| o.get(&index.to_string()).cloned()))
    }

    async fn run_from(
        &self,
        ctx: &Context,
        start_index: usize,
        mut current_input: Value,
    ) -> Result<Value, FlowError> {
        for index in start_index..self.steps.len() {
            ctx.set("step", json!(index));
            ctx.update("args_by_step", |existing| {
                let mut obj = existing.and_then(|v| v.as_object().cloned()).unwrap_or_default();
                obj.insert(index.to_string(), current_input.clone());
                Value::Object(obj)
            });
            let step = &self.steps[index];
            tracing::debug!(pipeline = %self.name, step = index, "running linear step");
            let step_ctx = ctx.child_context();
            current_input = step
                .call(Some(step_ctx), current_input)
                .await
                .map_err(|cause| {
                    tracing::warn!(pipeline = %self.name, step = index, error = %cause, "linear step failed");
                    FlowError::StepException {
                        index,
                        cause: Box::new(cause),
                    }
                })?;
        }
        Ok(current_input)
    }
}

#[async_trait]
impl Tool for Linear {
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
        ctx.x().init("init_input", kwargs.clone());
        ctx.init("args_by_step", json!({}));
        let start_index = ctx
            .get("step")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(0);
        ctx.set("step", json!(start_index));
        let current_input = Self::args_by_step_entry(ctx, start_index).unwrap_or_else(|| kwargs.clone());
        self.run_from(ctx, start_index, current_input)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }

    async fn retry(&self, ctx: &Context) -> Result<Value, ToolError> {
        ctx.clear(true, false);
        let step = ctx.get("step").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let current_input = Self::args_by_step_entry(ctx, step).unwrap_or(Value::Null);
        self.run_from(ctx, step, current_input)
            .await
            .map_err(|e| ToolError::Other(Box::new(e)))
    }
}
