/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use metrika_storage::error::StorageError;
///
/// let err = StorageError::Unavailable("no backend".to_string());
/// assert!(err.to_string().contains("no backend"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An error returned by the relational backend after retries ran out
    /// or on the first non-transient failure.
    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// Reading or writing the checkpoint file failed.
    #[error("Storage: checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint document could not be encoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend could not be constructed or is not reachable.
    #[error("Storage: unavailable: {0}")]
    Unavailable(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
