//! Compiled validators and the issues they report.
//!
//! The framework never interprets schema contents. A [`SchemaCompiler`](crate::schema::SchemaCompiler)
//! turns a schema into an opaque [`Validator`]; the pipeline only calls
//! [`Validator::validate`] and reports the returned issues.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single problem found while validating a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Where the problem is, as a JSON pointer into the validated value.
    pub location: String,
    /// Short machine-readable category (`type`, `required`, ...).
    pub kind: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        location: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ValidationIssue {
            location: location.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "[{}] {}", self.kind, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
        }
    }
}

/// Opaque product of a schema compiler.
pub trait Validator: Send + Sync {
    /// Check `value`; an empty error list is never returned.
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        self(value)
    }
}
