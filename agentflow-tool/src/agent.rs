//! `Agent` and `IterativeAgent`: tools whose `invoke` is fixed to a
//! prepare/call-llm/extract loop.

use crate::error::ToolError;
use crate::llm::Llm;
use crate::tool::Tool;
use agentflow_core::{kind, Argument, Context, Event};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// The prompt/parse hooks an [`Agent`] or [`IterativeAgent`] plugs in;
/// everything else (broadcasting, calling the LLM, looping) is fixed by
/// the agent itself.
pub trait PromptExtract: Send + Sync {
    /// Build the prompt to send to the LLM from the current context and
    /// call arguments.
    fn prepare_prompt(&self, ctx: &Context, kwargs: &Value) -> Result<String, ToolError>;

    /// Attempt to pull a final result out of the LLM's response. `Ok(None)`
    /// means "not done yet" — only meaningful inside [`IterativeAgent`],
    /// where it continues the loop; a plain [`Agent`] treats `None` as a
    /// failure to extract anything useful.
    fn extract_result(&self, ctx: &Context, response: &str) -> Result<Option<Value>, ToolError>;
}

/// A single prepare → call-llm → extract invocation, before the
/// `IterativeAgent` loop is layered on top.
pub struct Agent<E: PromptExtract> {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    llm: Arc<dyn Llm>,
    extract: E,
}

impl<E: PromptExtract> Agent<E> {
    /// Build an agent around an LLM and a prepare/extract strategy.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        llm: Arc<dyn Llm>,
        extract: E,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            llm,
            extract,
        }
    }
}

#[async_trait]
impl<E: PromptExtract + Send + Sync> Tool for Agent<E> {
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
        let prompt = self.extract.prepare_prompt(ctx, kwargs)?;
        ctx.broadcast(Event::new(kind::AGENT_PROMPT, json!({ "prompt": prompt })));
        ctx.broadcast(Event::new(kind::LLM_CALLED, json!({ "prompt": prompt })));
        let response = self.llm.complete(ctx, &prompt).await?;
        ctx.broadcast(Event::new(kind::LLM_RESPONSE, json!({ "response": response })));
        ctx.broadcast(Event::new(
            kind::AGENT_LLM_RESPONSE,
            json!({ "response": response }),
        ));
        match self.extract.extract_result(ctx, &response)? {
            Some(value) => Ok(value),
            None => Err(ToolError::ResponseException(
                "could not extract a result from the LLM response".into(),
            )),
        }
    }
}

/// An agent that repeats the prepare/call-llm/extract step until
/// `extract_result` returns `Some`, up to `max_steps`. `initial_state` is
/// copied into the context's local scope before the first step.
pub struct IterativeAgent<E: PromptExtract> {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    llm: Arc<dyn Llm>,
    extract: E,
    max_steps: usize,
    initial_state: Option<Value>,
}

impl<E: PromptExtract> IterativeAgent<E> {
    /// Build an iterative agent. `max_steps` bounds the loop
    ///; `initial_state`, if given, must be a JSON object and
    /// is copied key-by-key into the context's local scope before the
    /// first step.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        llm: Arc<dyn Llm>,
        extract: E,
        max_steps: usize,
        initial_state: Option<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            llm,
            extract,
            max_steps,
            initial_state,
        }
    }
}

#[async_trait]
impl<E: PromptExtract + Send + Sync> Tool for IterativeAgent<E> {
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
        if let Some(Value::Object(state)) = &self.initial_state {
            for (k, v) in state {
                ctx.set(k, v.clone());
            }
        }
        for step in 0..self.max_steps {
            let prompt = self.extract.prepare_prompt(ctx, kwargs)?;
            ctx.broadcast(Event::new(kind::AGENT_PROMPT, json!({ "prompt": prompt, "step": step })));
            ctx.broadcast(Event::new(kind::LLM_CALLED, json!({ "prompt": prompt })));
            let response = self.llm.complete(ctx, &prompt).await?;
            ctx.broadcast(Event::new(kind::LLM_RESPONSE, json!({ "response": response })));
            ctx.broadcast(Event::new(
                kind::AGENT_LLM_RESPONSE,
                json!({ "response": response }),
            ));
            ctx.broadcast(Event::new(kind::AGENT_BACKEND_STEP, json!({ "step": step })));
            if let Some(value) = self.extract.extract_result(ctx, &response)? {
                return Ok(value);
            }
        }
        Err(ToolError::MaxStepsExceeded(self.max_steps))
    }
}
