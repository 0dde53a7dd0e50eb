//! Error types for restcheck

use thiserror::Error;

/// Result type alias using the restcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// restcheck error types
///
/// Mismatched comparisons are not errors; they are reported through
/// [`crate::compare::ComparisonResult`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Seed statement {index} failed: {message}")]
    Seed { index: usize, statement: String, message: String },

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Sign-in self-heal failed for {email}: original error: {original}; retry error: {retry}")]
    Heal {
        email: String,
        original: String,
        retry: String,
    },

    #[error("Unknown workflow operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Cannot parse client call: {0}")]
    CallParse(String),

    #[error("Cannot parse expected response: {0}")]
    ExpectedResponse(String),

    #[error("Step expectation not met: {0}")]
    Expectation(String),

    #[error("Not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_step(step: &str, reason: impl Into<String>) -> Self {
        Error::InvalidStep {
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heal_error_keeps_both_messages() {
        let err = Error::Heal {
            email: "alice@rlstest.com".into(),
            original: "Invalid login credentials".into(),
            retry: "Email not confirmed".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Invalid login credentials"));
        assert!(text.contains("Email not confirmed"));
    }
}
