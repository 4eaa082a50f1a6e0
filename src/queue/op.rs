//! Queued operation model: kinds, statuses, payloads, error classification.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

// ============================================================================
// Kind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    NoteCreate,
    CloudUpload,
    CloudDelete,
    ImageUpload,
    FolderCreate,
    FolderRename,
    FolderDelete,
}

impl OperationKind {
    /// Scheduling priority; higher drains first.
    pub fn default_priority(self) -> i32 {
        match self {
            OperationKind::NoteCreate => 4,
            OperationKind::CloudDelete | OperationKind::FolderDelete => 3,
            OperationKind::CloudUpload | OperationKind::FolderRename => 2,
            OperationKind::ImageUpload | OperationKind::FolderCreate => 1,
        }
    }

    /// Upload-class kinds gate sync-tag confirmation and the sync guard.
    pub fn is_upload(self) -> bool {
        matches!(self, OperationKind::NoteCreate | OperationKind::CloudUpload)
    }

    pub fn is_folder_kind(self) -> bool {
        matches!(
            self,
            OperationKind::FolderCreate | OperationKind::FolderRename | OperationKind::FolderDelete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::NoteCreate => "note_create",
            OperationKind::CloudUpload => "cloud_upload",
            OperationKind::CloudDelete => "cloud_delete",
            OperationKind::ImageUpload => "image_upload",
            OperationKind::FolderCreate => "folder_create",
            OperationKind::FolderRename => "folder_rename",
            OperationKind::FolderDelete => "folder_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "note_create" => OperationKind::NoteCreate,
            "cloud_upload" => OperationKind::CloudUpload,
            "cloud_delete" => OperationKind::CloudDelete,
            "image_upload" => OperationKind::ImageUpload,
            "folder_create" => OperationKind::FolderCreate,
            "folder_rename" => OperationKind::FolderRename,
            "folder_delete" => OperationKind::FolderDelete,
            _ => return None,
        })
    }
}

// ============================================================================
// Status
// ============================================================================

/// `Completed` is intentionally absent: completion deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
    /// Terminal until an external credential reset re-arms the queue.
    AuthFailed,
    /// Terminal: the retry budget is spent.
    MaxRetryExceeded,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::AuthFailed | OperationStatus::MaxRetryExceeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Failed => "failed",
            OperationStatus::AuthFailed => "auth_failed",
            OperationStatus::MaxRetryExceeded => "max_retry_exceeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => OperationStatus::Pending,
            "processing" => OperationStatus::Processing,
            "failed" => OperationStatus::Failed,
            "auth_failed" => OperationStatus::AuthFailed,
            "max_retry_exceeded" => OperationStatus::MaxRetryExceeded,
            _ => return None,
        })
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// Persisted classification of the last execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    ServerError,
    AuthExpired,
    NotFound,
    Conflict,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "network" => ErrorKind::Network,
            "timeout" => ErrorKind::Timeout,
            "server_error" => ErrorKind::ServerError,
            "auth_expired" => ErrorKind::AuthExpired,
            "not_found" => ErrorKind::NotFound,
            "conflict" => ErrorKind::Conflict,
            "unknown" => ErrorKind::Unknown,
            _ => return None,
        })
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Typed payload, serialized to JSON bytes for the `payload` blob column.
/// The processor interprets it per kind; nothing else looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Content snapshot for `NoteCreate`/`CloudUpload`. Merges are
    /// last-write-wins on this snapshot.
    Note {
        title: String,
        content: String,
        folder_id: String,
    },
    /// Server tag for `CloudDelete`/`FolderDelete`.
    Delete { tag: Option<String> },
    /// Name (and tag, for renames) for `FolderCreate`/`FolderRename`.
    Folder { name: String, tag: Option<String> },
    /// Attachment reference for `ImageUpload`.
    Image { attachment_id: String },
}

// ============================================================================
// Operation
// ============================================================================

/// A durable intent against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    /// Note or folder id; may be temporary (see `is_local_id`).
    pub target_id: String,
    pub payload: OperationPayload,
    pub created_at: Timestamp,
    /// The user-visible save moment this operation represents.
    pub local_save_at: Option<Timestamp>,
    pub status: OperationStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// `target_id` is a client-generated temporary id.
    pub is_local_id: bool,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        target_id: impl Into<String>,
        payload: OperationPayload,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target_id: target_id.into(),
            payload,
            created_at: now,
            local_save_at: None,
            status: OperationStatus::Pending,
            priority: kind.default_priority(),
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            error_kind: None,
            is_local_id: false,
        }
    }

    pub fn with_local_save_at(mut self, at: Timestamp) -> Self {
        self.local_save_at = Some(at);
        self
    }

    pub fn with_local_id(mut self, is_local: bool) -> Self {
        self.is_local_id = is_local;
        self
    }

    /// Pending, Processing, or Failed — still owed to the server.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn priorities_follow_kind_table() {
        assert_eq!(OperationKind::NoteCreate.default_priority(), 4);
        assert_eq!(OperationKind::CloudDelete.default_priority(), 3);
        assert_eq!(OperationKind::FolderDelete.default_priority(), 3);
        assert_eq!(OperationKind::CloudUpload.default_priority(), 2);
        assert_eq!(OperationKind::FolderRename.default_priority(), 2);
        assert_eq!(OperationKind::ImageUpload.default_priority(), 1);
        assert_eq!(OperationKind::FolderCreate.default_priority(), 1);
    }

    #[test]
    fn retryable_set_is_network_timeout_server() {
        for kind in [ErrorKind::Network, ErrorKind::Timeout, ErrorKind::ServerError] {
            assert!(kind.is_retryable());
        }
        for kind in [
            ErrorKind::AuthExpired,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable());
        }
    }

    #[test]
    fn kind_and_status_round_trip_as_str() {
        for kind in [
            OperationKind::NoteCreate,
            OperationKind::CloudUpload,
            OperationKind::CloudDelete,
            OperationKind::ImageUpload,
            OperationKind::FolderCreate,
            OperationKind::FolderRename,
            OperationKind::FolderDelete,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            OperationStatus::Pending,
            OperationStatus::Processing,
            OperationStatus::Failed,
            OperationStatus::AuthFailed,
            OperationStatus::MaxRetryExceeded,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn payload_serializes_tagged() {
        let p = OperationPayload::Delete {
            tag: Some("t3".into()),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "delete");
        let back: OperationPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn new_operation_is_pending_with_kind_priority() {
        let op = Operation::new(
            OperationKind::CloudUpload,
            "n1",
            OperationPayload::Note {
                title: "t".into(),
                content: "c".into(),
                folder_id: "f".into(),
            },
            Utc::now(),
        );
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.priority, 2);
        assert_eq!(op.retry_count, 0);
        assert!(op.is_active());
    }
}
