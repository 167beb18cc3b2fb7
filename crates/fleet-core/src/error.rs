// ABOUTME: Error types for the durable and ephemeral session stores.
// ABOUTME: Provides StoreError and a Result alias using thiserror.

use thiserror::Error;

/// Errors from the persistence bridge or the ephemeral session store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The SQLite store rejected a query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem or process I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The ephemeral store command failed.
    #[error("ephemeral store error: {0}")]
    Ephemeral(String),

    /// A write was refused (in-memory store configured to fail).
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = StoreError::Ephemeral("redis-cli exited with 1".to_string());
        assert_eq!(err.to_string(), "ephemeral store error: redis-cli exited with 1");

        let err = StoreError::Rejected("offline".to_string());
        assert_eq!(err.to_string(), "write rejected: offline");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err: StoreError = io::Error::new(io::ErrorKind::NotFound, "no redis-cli").into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.to_string().contains("no redis-cli"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_database_error_from_sqlx() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_no_source_for_message_variants() {
        assert!(StoreError::Ephemeral("x".into()).source().is_none());
    }
}
