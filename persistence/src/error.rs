//! Error types for persistence operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Operation referenced a session id with no record
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but has no persisted dataset to restore
    #[error("session {0} has no persisted dataset")]
    DatasetMissing(String),

    /// Decompression or decoding of a stored payload failed
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// One chunk of a chunked dataset is absent from storage. Recovered by
    /// skipping during restore, surfaced as a warning.
    #[error("chunk {index} missing from storage")]
    ChunkMissing { index: usize },

    /// Every chunk of a chunked dataset was missing or skipped
    #[error("no valid chunks survived the restore")]
    NoValidChunks,

    /// The memory-pressure probe tripped before or during a chunk walk
    #[error("insufficient memory to restore the dataset")]
    InsufficientMemory,

    /// The caller's dataset apply callback failed
    #[error("dataset apply failed: {0}")]
    ApplyFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Restore was cancelled at a yield point
    #[error("restore cancelled")]
    Cancelled,

    /// A storage backend failed below the key/value contract
    #[error("storage operation failed for key {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Compression errors
    #[error("compression error: {0}")]
    Compression(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding errors at the adapter boundary
    #[error("MessagePack encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}
