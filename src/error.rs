use thiserror::Error;

/// Main error type for RAGSync
#[derive(Error, Debug)]
pub enum RagsyncError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or remote hiccup; safe to retry with backoff
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Source file could not be turned into text blocks
    #[error("Extraction error for {source_name}: {reason}")]
    Extraction { source_name: String, reason: String },

    /// Embedding model returned vectors of the wrong length
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Stored record can no longer be decoded
    #[error("Storage corruption in record {fingerprint}: {reason}")]
    StorageCorruption { fingerprint: String, reason: String },

    /// Non-transient embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Non-transient remote vector store errors
    #[error("Remote store error: {0}")]
    RemoteStore(String),

    /// Chunk not found
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A cycle ran past its deadline and was abandoned
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl RagsyncError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RagsyncError::TransientIo(_) => true,
            RagsyncError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Configuration-level errors that must be escalated instead of isolated per record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagsyncError::Config(_) | RagsyncError::DimensionMismatch { .. }
        )
    }
}

/// Convenient Result type using RagsyncError
pub type Result<T> = std::result::Result<T, RagsyncError>;
