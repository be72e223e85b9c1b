// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Policy engine error type
#[derive(Error, Debug, Diagnostic)]
pub enum PolicyError {
    /// The input could not be read
    #[error("Failed to read {path}: {source}")]
    #[diagnostic(
        code(pengine::io_error),
        help("Check that the file exists and is readable")
    )]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The cluster document was rejected before scheduling started
    #[error("Invalid input: {message}")]
    #[diagnostic(
        code(pengine::invalid_input),
        help("{suggestion}")
    )]
    InvalidInput {
        message: String,
        suggestion: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(pengine::core_error),
        help("Check the cluster document syntax")
    )]
    CoreError(#[from] warden_core::WardenError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(pengine::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for policy engine operations
pub type Result<T> = std::result::Result<T, PolicyError>;

impl PolicyError {
    /// Create an IoError
    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Check an internal invariant of the working set.
///
/// Debug builds panic so the bug surfaces immediately. Release builds log at
/// error level and run the fallback (`return ..`, `continue`) so the run
/// completes degraded.
macro_rules! check_invariant {
    ($cond:expr, $fallback:expr, $($arg:tt)+) => {
        if !($cond) {
            tracing::error!($($arg)+);
            if cfg!(debug_assertions) {
                panic!($($arg)+);
            }
            $fallback;
        }
    };
}

pub(crate) use check_invariant;
