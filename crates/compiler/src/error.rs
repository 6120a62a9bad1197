//! Compiler error taxonomy.
//!
//! Two families matter to the retry loop: *continuable* failures (payload
//! extraction and schema validation) are fed back into the context for
//! another decisive attempt, while service failures propagate immediately
//! because another reasoning attempt will not fix an outage.

use mediagen_core::schema::SchemaViolation;

use crate::runner::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// The prompt was rejected before any external call.
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    /// No opening brace found in the decisive pass output.
    #[error("No JSON object found in reasoning output")]
    NoJsonFound,

    /// An opening brace was found but never balanced, or the balanced
    /// span did not parse as JSON.
    #[error("Unbalanced JSON object in reasoning output")]
    UnbalancedJson,

    /// The reasoning service answered but produced no usable text.
    #[error("Reasoning service returned no usable text")]
    EmptyResponse,

    /// The payload still violated the target schema on the last allowed
    /// attempt. Carries every violation from that attempt.
    #[error("Schema validation failed: {}", join_violations(.0))]
    SchemaRejected(Vec<SchemaViolation>),

    /// Transport or API failure from the reasoning service. Never
    /// retried at this layer.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl CompilerError {
    /// Whether the bounded retry loop may continue after this failure.
    pub fn is_continuable(&self) -> bool {
        matches!(
            self,
            CompilerError::NoJsonFound
                | CompilerError::UnbalancedJson
                | CompilerError::SchemaRejected(_)
        )
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
