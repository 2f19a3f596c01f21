//! Error types for keel-db

use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Statement exceeded the configured timeout (D003)
    #[error("[D003] SQL execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// BEGIN/COMMIT/ROLLBACK issued in the wrong state or failed (D004)
    #[error("[D004] Transaction error: {0}")]
    TransactionError(String),

    /// Not implemented (D005)
    #[error("[D005] Feature not implemented for {backend}: {feature}")]
    NotImplemented { backend: String, feature: String },

    /// Mutex poisoned (D006)
    #[error("[D006] Database mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Connection string could not be parsed (D007)
    #[error("[D007] Invalid connection string: {0}")]
    InvalidConnectionString(String),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::ExecutionError(err.to_string())
    }
}
