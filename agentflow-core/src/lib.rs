//! Execution core for agentflow: typed contexts, an event bus, and a
//! thread-safe data store, shared by the tool and flow layers.
//!
//! Everything in this crate is deliberately free of any notion of "tool" or
//! "LLM" — those live in `agentflow-tool` and `agentflow-flow`. This crate
//! only knows about contexts, events, and data.

pub mod context;
pub mod datastore;
pub mod error;
pub mod event;
pub mod id;
pub mod schema;

pub use context::{
    debug_enabled, set_debug_enabled, AttachedKind, Attached, Context, ContextException, Scope,
    Status,
};
pub use datastore::DataStore;
pub use error::CoreError;
pub use event::{kind, Event, EventFilter, Timestamp};
pub use id::ContextId;
pub use schema::{fill_defaults, validate, Argument, Example, ResultSchema, Validation};
