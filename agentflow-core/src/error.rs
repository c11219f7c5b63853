//! Error taxonomy for the context/event/data-store layer.
//!
//! Errors raised further up the stack (invalid tool arguments, step
//! failures, agent parsing failures) live in `agentflow-tool` and
//! `agentflow-flow`; this enum only covers violations of the Context state
//! machine itself.

use thiserror::Error;

/// Errors raised by the `Context`/`Event`/`DataStore` layer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    /// `Context::wait` elapsed before the context completed.
    #[error("wait on context timed out")]
    Timeout,

    /// A requested feature has no implementation (e.g. `Context::cancel`).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// `args` was assigned a second time.
    #[error("context args can only be set once")]
    ArgsAlreadySet,

    /// `attached` was assigned a second time.
    #[error("context is already attached to {0}")]
    AlreadyAttached(String),

    /// Both `output` and `exception` were assigned, or the same terminal
    /// field was assigned twice.
    #[error("context already has a terminal value ({0})")]
    AlreadyTerminal(&'static str),

    /// Catch-all for errors surfaced from user-supplied closures/data.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
