//! Crate-wide error types.

use thiserror::Error;

use crate::remote::RemoteError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error for queue, coordinator, and processor operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A persistence-port call failed. These escape to the caller; the
    /// queue never retries persistence on its own.
    #[error("storage: {0}")]
    Storage(#[from] StoreError),

    /// A remote API call failed. Inside the processor these are classified
    /// and turned into queue-state transitions; they only surface from
    /// direct port usage.
    #[error("remote: {0}")]
    Remote(#[from] RemoteError),

    /// A queue drain is already running (`process_queue`/`process_retries`
    /// share one re-entrancy flag).
    #[error("a queue drain is already in progress")]
    AlreadySyncing,

    #[error("invalid note data: {0}")]
    InvalidNoteData(String),

    #[error("note {0} not found in local store")]
    NoteNotFound(String),

    #[error("folder {0} not found in local store")]
    FolderNotFound(String),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Error from a `SyncStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend: {0}")]
    Backend(String),
}
