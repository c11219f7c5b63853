//! Error taxonomy for tool/agent invocation.

use agentflow_core::CoreError;
use thiserror::Error;

/// Errors raised by [`crate::Tool::call`], [`crate::Tool::async_call`], and
/// [`crate::Tool::retry`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// `Registrar::get` or a by-name lookup found nothing.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Validation against the tool's [`agentflow_core::Argument`] schema
    /// failed.
    #[error("invalid arguments: missing {missing_required:?}, extraneous {extraneous:?}")]
    InvalidArguments {
        /// Required arguments the caller did not supply.
        missing_required: Vec<String>,
        /// Names the caller supplied that the schema does not recognize.
        extraneous: Vec<String>,
    },

    /// `kwargs` was not a JSON object (the only shape this workspace's
    /// statically-typed `call` accepts — see `tool.rs` module docs).
    #[error("kwargs must be a JSON object")]
    KwargsNotAnObject,

    /// An agent's LLM returned a response `extract_result` could not parse.
    #[error("could not extract a result from the LLM response: {0}")]
    ResponseException(String),

    /// An agent backend could not format its prompt.
    #[error("could not format prompt: {0}")]
    FormatException(String),

    /// An `IterativeAgent`/backend loop exceeded `max_steps`.
    #[error("exceeded max steps ({0})")]
    MaxStepsExceeded(usize),

    /// Propagated from the underlying `Context` state machine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Catch-all for a tool implementation's own error type.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
