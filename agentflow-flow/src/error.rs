//! Error taxonomy for flow combinators.

use agentflow_core::CoreError;
use agentflow_tool::ToolError;
use thiserror::Error;

/// Errors raised by [`crate::Linear`], [`crate::DoWhile`], and
/// [`crate::ParallelList`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FlowError {
    /// A `Linear` step raised; the index is the step's position.
    #[error("step {index} failed: {cause}")]
    StepException {
        /// Position of the failing step.
        index: usize,
        /// The step's own error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A `DoWhile` loop ran `max_iterations` times without its
    /// `stop_condition` returning `true`.
    #[error("exceeded max iterations ({0})")]
    MaxIterationsExceeded(usize),

    /// A `ParallelList` constructed with `completion_strategy: Fail`
    /// observed a per-item failure.
    #[error("item {index} failed: {cause}")]
    ItemException {
        /// Position of the failing item.
        index: usize,
        /// The item's own error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Rejected at construction time: an unknown completion strategy name,
    /// a missing `completion_count` for `Strategy::N`, or an unknown error
    /// strategy.
    #[error("invalid combinator configuration: {0}")]
    InvalidConfiguration(String),

    /// Propagated from a wrapped [`Tool`](agentflow_tool::Tool)'s own call.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Propagated from the underlying `Context` state machine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
