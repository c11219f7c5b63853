//! The Tool/Agent invocation protocol and process registrar, built on
//! `agentflow-core`'s Context tree and event bus.

pub mod agent;
pub mod backend;
pub mod error;
pub mod llm;
pub mod registrar;
pub mod tool;

pub use agent::{Agent, IterativeAgent, PromptExtract};
pub use backend::{Backend, BackendAgent, BackendStep, Prompt};
pub use error::ToolError;
pub use llm::Llm;
pub use registrar::Registrar;
pub use tool::{async_call, derive_context, FnTool, Tool};
