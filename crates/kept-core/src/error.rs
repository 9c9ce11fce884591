//! Error types for kept-core

use thiserror::Error;

use crate::embedding::EmbeddingError;

/// Result type alias using kept-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kept-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Malformed input, rejected before any write
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The id is already owned by a different user
    #[error("Ownership conflict: {0}")]
    OwnershipConflict(String),

    /// A query could not be embedded
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl Error {
    /// Whether the caller may retry the identical request later.
    ///
    /// Persistence failures are transient from the client's point of view;
    /// validation and ownership failures will fail again unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LibSql(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_are_retryable() {
        assert!(Error::Database("disk I/O error".to_string()).is_retryable());
        assert!(!Error::InvalidInput("id is required".to_string()).is_retryable());
        assert!(!Error::OwnershipConflict("task".to_string()).is_retryable());
        assert!(!Error::from(EmbeddingError::Disabled).is_retryable());
    }
}
