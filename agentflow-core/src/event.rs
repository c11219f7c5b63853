//! Typed events with timestamps.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable string identifiers for the event types the core itself emits.
///
/// Domain code may broadcast any other `&str` as an event type — the bus
/// treats event types as opaque strings, these constants just save callers
/// from retyping the core's own vocabulary.
pub mod kind {
    /// A tool (or agent, or flow) was invoked.
    pub const TOOL_CALLED: &str = "ToolCalled";
    /// A tool invocation returned successfully.
    pub const TOOL_RETURN: &str = "ToolReturn";
    /// A tool invocation raised an exception.
    pub const TOOL_EXCEPTION: &str = "ToolException";
    /// A child context was created.
    pub const CHILD_CONTEXT_CREATED: &str = "ChildContextCreated";
    /// A value in one of the context's data scopes changed.
    pub const CONTEXT_UPDATE: &str = "ContextUpdate";
    /// An LLM call was initiated.
    pub const LLM_CALLED: &str = "LLMCalled";
    /// An LLM call returned.
    pub const LLM_RESPONSE: &str = "LLMResponse";
    /// An agent backend advanced one step.
    pub const AGENT_BACKEND_STEP: &str = "AgentBackendStep";
    /// An agent's prepared prompt, ready to send to the LLM.
    pub const AGENT_PROMPT: &str = "AgentPrompt";
    /// An agent received a response from its LLM.
    pub const AGENT_LLM_RESPONSE: &str = "AgentLLMResponse";
    /// An agent extracted tool calls from an LLM response.
    pub const AGENT_TOOL_CALLS: &str = "AgentToolCalls";

    /// The special bucket matching every event type.
    pub const ALL: &str = "all";
}

/// Wall-clock plus monotonic timestamp attached to every [`Event`].
///
/// The monotonic component orders events within a single process run; the
/// wall-clock component is what survives JSON round-trips across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub wall_ms: i64,
    /// Nanoseconds from a process-local monotonic clock. Only meaningful
    /// for ordering events emitted by the same process run.
    pub monotonic_ns: u128,
}

impl Timestamp {
    /// Capture the current wall-clock and monotonic time.
    pub fn now() -> Self {
        static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(std::time::Instant::now);
        Self {
            wall_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            monotonic_ns: start.elapsed().as_nanos(),
        }
    }
}

/// An immutable record appended to a context's history and dispatched to
/// listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The event's type, e.g. [`kind::TOOL_CALLED`] or a domain-defined tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event was created.
    pub timestamp: Timestamp,
    /// Opaque payload. The bus never interprets this; it only routes on
    /// `event_type`.
    pub data: serde_json::Value,
}

impl Event {
    /// Construct a new event of the given type, capturing the current time.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Timestamp::now(),
            data,
        }
    }
}

/// Which events a listener wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// Every event type, regardless of name.
    All,
    /// Only events of the named type.
    Named(String),
}

impl EventFilter {
    pub(crate) fn key(&self) -> &str {
        match self {
            EventFilter::All => kind::ALL,
            EventFilter::Named(s) => s.as_str(),
        }
    }
}

impl From<&str> for EventFilter {
    fn from(s: &str) -> Self {
        if s == kind::ALL {
            EventFilter::All
        } else {
            EventFilter::Named(s.to_string())
        }
    }
}
