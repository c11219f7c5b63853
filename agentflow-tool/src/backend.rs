//! Supplemental: pluggable agent backends (SPEC_FULL.md §4.11, grounded on
//! `examples/original_source/agents/backends/base.py` and
//! `agents/backends/react.py`).
//!
//! [`IterativeAgent`](crate::IterativeAgent) covers the "call once per
//! iteration, stop when `extract_result` says so" shape. A backend owns
//! more of the loop itself: it decides, from the LLM's raw response,
//! whether to keep going (and what to send next) or to stop — the seam a
//! ReAct-style "reason, call tools, observe" agent needs without forking
//! the loop driver.

use crate::error::ToolError;
use crate::llm::Llm;
use crate::tool::Tool;
use agentflow_core::{kind, Argument, Context, Event};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// A prompt ready to send to an [`Llm`].
#[derive(Debug, Clone)]
pub struct Prompt(pub String);

/// What a [`Backend`] decided after seeing one LLM response.
#[derive(Debug, Clone)]
pub enum BackendStep {
    /// Send `Prompt` next and keep looping.
    Continue(Prompt),
    /// The loop is done; this is the agent's output.
    Done(Value),
}

/// Owns the prompt/parse loop for a [`BackendAgent`] (SPEC_FULL.md §4.11).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Build the first prompt from the call arguments.
    async fn prepare(&self, ctx: &Context, kwargs: &Value) -> Result<Prompt, ToolError>;

    /// Decide what to do with one LLM response.
    async fn step(&self, ctx: &Context, response: &str) -> Result<BackendStep, ToolError>;
}

/// An agent driven by a [`Backend`] rather than a fixed prepare/extract
/// pair — additive alongside [`crate::Agent`]/[`crate::IterativeAgent`],
/// not a replacement for them.
pub struct BackendAgent<B: Backend> {
    id: String,
    name: String,
    description: String,
    args: Vec<Argument>,
    llm: Arc<dyn Llm>,
    backend: B,
    max_steps: usize,
}

impl<B: Backend> BackendAgent<B> {
    /// Build a backend-driven agent. `max_steps` bounds the loop even if
    /// the backend never returns `Done`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: Vec<Argument>,
        llm: Arc<dyn Llm>,
        backend: B,
        max_steps: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            args,
            llm,
            backend,
            max_steps,
        }
    }
}

#[async_trait]
impl<B: Backend + Send + Sync> Tool for BackendAgent<B> {
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
        let mut prompt = self.backend.prepare(ctx, kwargs).await?;
        for step in 0..self.max_steps {
            ctx.broadcast(Event::new(
                kind::AGENT_PROMPT,
                json!({ "prompt": prompt.0, "step": step }),
            ));
            ctx.broadcast(Event::new(kind::LLM_CALLED, json!({ "prompt": prompt.0 })));
            let response = self.llm.complete(ctx, &prompt.0).await?;
            ctx.broadcast(Event::new(kind::LLM_RESPONSE, json!({ "response": response })));
            ctx.broadcast(Event::new(
                kind::AGENT_LLM_RESPONSE,
                json!({ "response": response }),
            ));
            ctx.broadcast(Event::new(kind::AGENT_BACKEND_STEP, json!({ "step": step })));
            match self.backend.step(ctx, &response).await? {
                BackendStep::Done(value) => return Ok(value),
                BackendStep::Continue(next) => prompt = next,
            }
        }
        Err(ToolError::MaxStepsExceeded(self.max_steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoLlm;
    #[async_trait]
    impl Llm for EchoLlm {
        fn context_length(&self) -> usize {
            2048
        }
        async fn complete(&self, _ctx: &Context, prompt: &str) -> Result<String, ToolError> {
            Ok(format!("reply-to({prompt})"))
        }
    }

    struct TwoStepBackend {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Backend for TwoStepBackend {
        async fn prepare(&self, _ctx: &Context, kwargs: &Value) -> Result<Prompt, ToolError> {
            Ok(Prompt(format!("start:{}", kwargs["q"])))
        }
        async fn step(&self, _ctx: &Context, response: &str) -> Result<BackendStep, ToolError> {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(BackendStep::Continue(Prompt(format!("again:{response}"))))
            } else {
                Ok(BackendStep::Done(json!(response)))
            }
        }
    }

    #[tokio::test]
    async fn backend_agent_continues_then_finishes() {
        let agent = BackendAgent::new(
            "b1",
            "backend-agent",
            "",
            vec![Argument::required("q", "", "str")],
            Arc::new(EchoLlm),
            TwoStepBackend {
                seen: AtomicUsize::new(0),
            },
            5,
        );
        let out = agent.call(None, json!({"q": "hi"})).await.unwrap();
        assert_eq!(out, json!("reply-to(again:reply-to(start:hi))"));
    }

    struct NeverDoneBackend;
    #[async_trait]
    impl Backend for NeverDoneBackend {
        async fn prepare(&self, _ctx: &Context, _kwargs: &Value) -> Result<Prompt, ToolError> {
            Ok(Prompt("p".into()))
        }
        async fn step(&self, _ctx: &Context, response: &str) -> Result<BackendStep, ToolError> {
            Ok(BackendStep::Continue(Prompt(response.to_string())))
        }
    }

    #[tokio::test]
    async fn backend_agent_respects_max_steps() {
        let agent = BackendAgent::new(
            "b2",
            "stuck-agent",
            "",
            vec![],
            Arc::new(EchoLlm),
            NeverDoneBackend,
            2,
        );
        let err = agent.call(None, json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::MaxStepsExceeded(2)));
    }
}
