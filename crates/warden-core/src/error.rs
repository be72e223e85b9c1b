// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Warden operations
#[derive(Error, Debug, Diagnostic)]
pub enum WardenError {
    /// The cluster document is structurally invalid
    #[error("Invalid cluster document: {reason}")]
    #[diagnostic(
        code(warden::invalid_document),
        help("{suggestion}")
    )]
    InvalidDocument {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A score string could not be parsed
    #[error("Invalid score: {value}")]
    #[diagnostic(
        code(warden::invalid_score),
        help("Use an integer, INFINITY, +INFINITY or -INFINITY")
    )]
    InvalidScore {
        #[allow(unused)]
        value: String,
    },

    /// An interval or timeout could not be parsed
    #[error("Invalid interval: {value}")]
    #[diagnostic(
        code(warden::invalid_interval),
        help("Use a number of seconds or a value with a unit suffix like 500ms, 10s, 2min or 1h")
    )]
    InvalidInterval {
        #[allow(unused)]
        value: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(warden::serialization_error),
        help("Ensure the document format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(warden::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Create an InvalidDocument error
    pub fn invalid_document(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidDocument {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InvalidScore error
    pub fn invalid_score(value: impl Into<String>) -> Self {
        Self::InvalidScore {
            value: value.into(),
        }
    }

    /// Create an InvalidInterval error
    pub fn invalid_interval(value: impl Into<String>) -> Self {
        Self::InvalidInterval {
            value: value.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = WardenError::invalid_score("lots");
        assert!(matches!(err, WardenError::InvalidScore { .. }));
        assert_eq!(err.to_string(), "Invalid score: lots");

        let err = WardenError::invalid_document(
            "resource rsc1 is defined twice",
            "Give every resource a unique id",
        );
        assert!(matches!(err, WardenError::InvalidDocument { .. }));
    }
}
