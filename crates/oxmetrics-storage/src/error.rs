/// Errors raised by the durable persisters.
///
/// # Examples
///
/// ```rust
/// use oxmetrics_storage::error::StorageError;
///
/// let err = StorageError::Malformed { skipped: 2 };
/// assert!(err.to_string().contains('2'));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the snapshot file failed.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot record could not be encoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A statement could not be built for the connected backend.
    #[error("Storage: query build error: {0}")]
    Query(String),

    /// The health check did not answer within its deadline.
    #[error("Storage: health check timed out")]
    CheckTimeout,

    /// Some snapshot records were unreadable and skipped during restore.
    #[error("Storage: {skipped} malformed snapshot record(s) skipped")]
    Malformed { skipped: usize },
}

impl StorageError {
    /// Transient database conditions that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Database(
                sea_orm::DbErr::ConnectionAcquire(_) | sea_orm::DbErr::Conn(_)
            ) | StorageError::CheckTimeout
        )
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
