//! Process-unique identifiers for contexts.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A process-unique identifier for a [`crate::Context`].
///
/// Stable across `to_json`/`from_json` round-trips: a process-unique
/// identifier that survives a snapshot/restore cycle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh, random context id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reconstruct a context id from its string form (used by `from_json`).
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
