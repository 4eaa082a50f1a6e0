//! Remote API port: typed calls against the note service.
//!
//! Implementations own HTTP, authentication headers, and timeouts; the core
//! only sees the response envelope and a transport-level error. Timeouts
//! surface as `RemoteError::Timeout`, reachability failures as
//! `RemoteError::Network`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::Timestamp;

// ============================================================================
// RemoteApi — user-provided network layer
// ============================================================================

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_note(
        &self,
        title: &str,
        content: &str,
        folder_id: &str,
    ) -> Result<ApiResponse, RemoteError>;

    async fn update_note(
        &self,
        id: &str,
        title: &str,
        content: &str,
        folder_id: &str,
        existing_tag: Option<&str>,
    ) -> Result<ApiResponse, RemoteError>;

    async fn delete_note(
        &self,
        id: &str,
        tag: Option<&str>,
        purge: bool,
    ) -> Result<ApiResponse, RemoteError>;

    async fn create_folder(&self, name: &str) -> Result<ApiResponse, RemoteError>;

    async fn rename_folder(
        &self,
        id: &str,
        name: &str,
        existing_tag: Option<&str>,
        original_create_date: Option<Timestamp>,
    ) -> Result<ApiResponse, RemoteError>;

    async fn delete_folder(
        &self,
        id: &str,
        tag: Option<&str>,
        purge: bool,
    ) -> Result<ApiResponse, RemoteError>;

    async fn download_attachment(
        &self,
        note_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, RemoteError>;

    /// One page of incremental sync. The returned entries are opaque to the
    /// core beyond id and modification time; the sync driver feeds them to
    /// the guard and writes survivors to the store.
    async fn fetch_page(&self, sync_tag: Option<&str>) -> Result<SyncPage, RemoteError>;
}

// ============================================================================
// Response envelope
// ============================================================================

/// Standard service envelope. Modern endpoints signal success with
/// `code == 0`; legacy ones answer `result: "ok"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ApiData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ApiEntry>,
}

/// The entity echo inside `data.entry`. Unknown fields are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
            || matches!(self.result.as_deref(), Some("ok") | Some("OK"))
    }

    /// Tag resolution order: `data.entry.tag`, then top-level `tag`, then
    /// the caller-provided fallback.
    pub fn entry_tag(&self, fallback: Option<String>) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.entry.as_ref())
            .and_then(|e| e.tag.clone())
            .or_else(|| self.tag.clone())
            .or(fallback)
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.entry.as_ref())
            .and_then(|e| e.id.as_deref())
    }

    pub fn entry_folder_id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.entry.as_ref())
            .and_then(|e| e.folder_id.as_deref())
    }
}

// ============================================================================
// Sync page
// ============================================================================

/// One incremental sync response: the next cursor plus modified entities.
#[derive(Debug, Clone, Default)]
pub struct SyncPage {
    pub sync_tag: String,
    pub notes: Vec<RemoteEntry>,
    pub folders: Vec<RemoteEntry>,
}

/// A remotely-modified entity. `body` stays opaque; the driver that applies
/// the page interprets it.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub id: String,
    pub modified_at: Timestamp,
    pub body: Value,
}

// ============================================================================
// Transport error
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Reachability failure before an HTTP status was obtained.
    #[error("network: {0}")]
    Network(String),

    /// The transport's deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx HTTP status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// 2xx transport, but the envelope carried a non-success code.
    #[error("api code {code}: {message}")]
    Api { code: i64, message: String },

    /// Response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(json: Value) -> ApiResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn success_is_code_zero_or_legacy_ok() {
        assert!(resp(serde_json::json!({ "code": 0 })).is_success());
        assert!(resp(serde_json::json!({ "code": 7, "result": "ok" })).is_success());
        assert!(resp(serde_json::json!({ "code": 7, "result": "OK" })).is_success());
        assert!(!resp(serde_json::json!({ "code": 7 })).is_success());
        assert!(!resp(serde_json::json!({ "code": 1, "result": "error" })).is_success());
    }

    #[test]
    fn tag_prefers_entry_then_top_level_then_fallback() {
        let full = resp(serde_json::json!({
            "code": 0,
            "tag": "outer",
            "data": { "entry": { "id": "n1", "tag": "inner" } }
        }));
        assert_eq!(full.entry_tag(Some("fb".into())), Some("inner".into()));

        let outer_only = resp(serde_json::json!({ "code": 0, "tag": "outer" }));
        assert_eq!(outer_only.entry_tag(Some("fb".into())), Some("outer".into()));

        let bare = resp(serde_json::json!({ "code": 0 }));
        assert_eq!(bare.entry_tag(Some("fb".into())), Some("fb".into()));
        assert_eq!(bare.entry_tag(None), None);
    }

    #[test]
    fn entry_fields_parse_camel_case() {
        let r = resp(serde_json::json!({
            "code": 0,
            "data": { "entry": { "id": "srv-7", "folderId": "f1" } }
        }));
        assert_eq!(r.entry_id(), Some("srv-7"));
        assert_eq!(r.entry_folder_id(), Some("f1"));
    }
}
