//! Error types for backend operations.

use relmap_codec::CodecError;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur during backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No row matches the requested id.
    #[error("no row in \"{table}\" matches {id}")]
    NotFound {
        /// The table that was searched.
        table: String,
        /// The id that was requested.
        id: String,
    },

    /// The backend config names a table the backend does not have.
    #[error("unknown table \"{0}\"")]
    UnknownTable(String),

    /// A row with the same primary key already exists.
    #[error("duplicate key {id} in \"{table}\"")]
    Duplicate {
        /// The table written to.
        table: String,
        /// The conflicting key.
        id: String,
    },

    /// A model, junction or backend config is malformed.
    #[error("invalid config for \"{subject}\": {message}")]
    InvalidConfig {
        /// The model, junction or table the config belongs to.
        subject: String,
        /// What is wrong with it.
        message: String,
    },

    /// The backend refused the operation.
    #[error("operation rejected: {0}")]
    Rejected(String),

    /// A value could not be interpreted.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BackendError {
    /// Create a not found error.
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate key error.
    pub fn duplicate(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            subject: subject.into(),
            message: message.into(),
        }
    }
}
