//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while parsing paths or manipulating values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A property path could not be parsed.
    #[error("invalid property path \"{path}\": {message}")]
    InvalidPath {
        /// The offending path text.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// A value had a different kind than the operation requires.
    #[error("unexpected type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// The kind the operation needed.
        expected: String,
        /// The kind that was found.
        actual: String,
    },

    /// Identity values must be scalars.
    #[error("a {kind} value cannot be used as an identifier")]
    NotScalar {
        /// Kind of the rejected value.
        kind: String,
    },

    /// A condition key could not be parsed.
    #[error("invalid condition \"{condition}\": {message}")]
    InvalidCondition {
        /// The offending condition key.
        condition: String,
        /// What is wrong with it.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unexpected type error.
    pub fn unexpected_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid condition error.
    pub fn invalid_condition(condition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCondition {
            condition: condition.into(),
            message: message.into(),
        }
    }
}
