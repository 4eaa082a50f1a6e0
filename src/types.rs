//! Entity types shared across the store, queue, and registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp used for all persisted time fields.
pub type Timestamp = DateTime<Utc>;

/// What kind of entity an id or mapping refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Note,
    Folder,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::Folder => "folder",
        }
    }
}

/// A note row as the sync core sees it. Content semantics (HTML/XML
/// conversion, attachments) live outside; only identity, placement,
/// server tag, and timestamps matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub folder_id: String,
    pub title: String,
    pub content: String,
    /// Server-issued version tag, absent until the first successful upload.
    pub server_tag: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A folder row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub server_tag: Option<String>,
    pub created_at: Timestamp,
}

/// Mapping from a client-generated temporary id to the server-assigned one.
///
/// Created when an upload first returns a server id; `completed` flips once
/// every reference (store row, queue rows, UI) has been rewritten. Completed
/// mappings are garbage-collected by `cleanup_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    pub local_id: String,
    pub server_id: String,
    pub entity_kind: EntityKind,
    pub created_at: Timestamp,
    pub completed: bool,
}

/// Persisted singleton tracking the server cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<Timestamp>,
    /// Opaque server cursor. Only advanced to values the server returned,
    /// and only while no upload-class operation is in flight.
    pub sync_tag: Option<String>,
}
