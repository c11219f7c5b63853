//! Argument, Result, and Example schemas.
//!
//! Types are descriptive strings (`"int"`, `"list[str]"`, ...) rather than
//! an enforced type system — the core treats `type_name` as documentation;
//! coercing primitive types is left to validator hooks at external
//! boundaries, not to this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes one named parameter a [`crate::Tool`] (or flow combinator)
/// accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    /// Parameter name, matched against caller-supplied kwargs.
    pub name: String,
    /// Human-readable description, surfaced in `Tool::to_json`.
    pub description: String,
    /// Descriptive type string (documentation only, not enforced).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the caller must supply this argument.
    pub required: bool,
    /// Value inserted when `required` is false and the caller omitted it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Argument {
    /// A required argument with the given name, description, and type.
    pub fn required(
        name: impl Into<String>,
        description: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_name: type_name.into(),
            required: true,
            default: None,
        }
    }

    /// An optional argument with the given name, description, type, and
    /// default value filled in when the caller omits it.
    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        type_name: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_name: type_name.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// Pure documentation describing a tool's return value. Never enforced at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSchema {
    /// Descriptive type string.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Human-readable description.
    pub description: String,
}

/// A worked example attached to a tool's metadata, surfaced to callers
/// (e.g. LLM-facing tool catalogs) via `Tool::to_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    /// Example input kwargs.
    pub args: Value,
    /// Example output, if illustrating a successful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Free-form explanation of the example.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The outcome of validating caller-supplied kwargs against an argument
/// schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Required arguments the schema names that the caller did not supply.
    pub missing_required: Vec<String>,
    /// Names the caller supplied that the schema does not recognize.
    pub extraneous: Vec<String>,
}

impl Validation {
    /// Whether this validation found no problems.
    pub fn is_ok(&self) -> bool {
        self.missing_required.is_empty() && self.extraneous.is_empty()
    }
}

/// Validate `kwargs` against `schema`, reporting missing required
/// arguments and extraneous names. Does not mutate `kwargs` — see
/// [`fill_defaults`] for default-filling.
pub fn validate(schema: &[Argument], kwargs: &serde_json::Map<String, Value>) -> Validation {
    let known: std::collections::HashSet<&str> = schema.iter().map(|a| a.name.as_str()).collect();
    let missing_required = schema
        .iter()
        .filter(|a| a.required && !kwargs.contains_key(&a.name))
        .map(|a| a.name.clone())
        .collect();
    let extraneous = kwargs
        .keys()
        .filter(|k| !known.contains(k.as_str()))
        .cloned()
        .collect();
    Validation {
        missing_required,
        extraneous,
    }
}

/// For each argument in `schema` with a default, absent from `kwargs`,
/// insert its default.
pub fn fill_defaults(schema: &[Argument], kwargs: &mut serde_json::Map<String, Value>) {
    for arg in schema {
        if let Some(default) = &arg.default {
            kwargs.entry(arg.name.clone()).or_insert_with(|| default.clone());
        }
    }
}
