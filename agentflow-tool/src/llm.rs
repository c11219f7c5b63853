//! The `Llm` collaborator boundary.
//!
//! No concrete provider lives in this workspace — this
//! is the interface `Agent`/`IterativeAgent` consume.

use crate::error::ToolError;
use agentflow_core::Context;
use async_trait::async_trait;

/// A tool-like callable an [`crate::Agent`] drives to turn a prompt into
/// text.
#[async_trait]
pub trait Llm: Send + Sync {
    /// The model's context window, in tokens.
    fn context_length(&self) -> usize;

    /// Complete `prompt`, returning the model's raw text response.
    async fn complete(&self, ctx: &Context, prompt: &str) -> Result<String, ToolError>;

    /// Estimate how many tokens `text` will consume. A default heuristic
    /// (roughly four characters per token, the common rule of thumb for
    /// English text) that concrete providers should override with their
    /// own tokenizer when one is available.
    fn estimate_tokens(&self, text: &str) -> usize {
        (text.chars().count() as f64 / 4.0).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Llm for Fixed {
        fn context_length(&self) -> usize {
            4096
        }
        async fn complete(&self, _ctx: &Context, _prompt: &str) -> Result<String, ToolError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn default_token_estimate_is_roughly_four_chars_per_token() {
        let llm = Fixed("hi");
        assert_eq!(llm.estimate_tokens("abcdefgh"), 2);
        assert_eq!(llm.estimate_tokens(""), 0);
    }

    #[tokio::test]
    async fn complete_returns_fixed_text() {
        let llm = Fixed("hello");
        let ctx = Context::new();
        assert_eq!(llm.complete(&ctx, "anything").await.unwrap(), "hello");
    }
}
