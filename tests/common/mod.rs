//! Shared fixtures: a scripted remote, an engine over in-memory ports, and
//! an event collector.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use note_sync::clock::ManualClock;
use note_sync::remote::{ApiResponse, RemoteApi, RemoteError, SyncPage};
use note_sync::storage::memory::MemoryStore;
use note_sync::types::Timestamp;
use note_sync::{EventBus, SyncConfig, SyncEngine, SyncEvent};

// ============================================================================
// MockRemote
// ============================================================================

/// One entry per remote invocation, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateNote {
        title: String,
        folder_id: String,
    },
    UpdateNote {
        id: String,
        existing_tag: Option<String>,
    },
    DeleteNote {
        id: String,
        tag: Option<String>,
        purge: bool,
    },
    CreateFolder {
        name: String,
    },
    RenameFolder {
        id: String,
        name: String,
    },
    DeleteFolder {
        id: String,
        tag: Option<String>,
    },
    DownloadAttachment {
        note_id: String,
        attachment_id: String,
    },
    FetchPage {
        sync_tag: Option<String>,
    },
}

/// Scripted remote: responses are popped FIFO across all entity calls; an
/// empty script answers plain success. Every invocation is logged.
#[derive(Default)]
pub struct MockRemote {
    responses: Mutex<VecDeque<Result<ApiResponse, RemoteError>>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, response: Result<ApiResponse, RemoteError>) {
        self.responses.lock().push_back(response);
    }

    /// Script a success whose `data.entry` echoes the given identity.
    pub fn push_entry(&self, id: &str, tag: &str, folder_id: Option<&str>) {
        let mut entry = serde_json::json!({ "id": id, "tag": tag });
        if let Some(folder_id) = folder_id {
            entry["folderId"] = serde_json::json!(folder_id);
        }
        let resp: ApiResponse =
            serde_json::from_value(serde_json::json!({ "code": 0, "data": { "entry": entry } }))
                .expect("valid mock response");
        self.push_response(Ok(resp));
    }

    pub fn push_http_error(&self, status: u16) {
        self.push_response(Err(RemoteError::Http {
            status,
            message: format!("status {status}"),
        }));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    fn next(&self, call: RemoteCall) -> Result<ApiResponse, RemoteError> {
        self.calls.lock().push(call);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ApiResponse::default()))
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create_note(
        &self,
        title: &str,
        _content: &str,
        folder_id: &str,
    ) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::CreateNote {
            title: title.to_string(),
            folder_id: folder_id.to_string(),
        })
    }

    async fn update_note(
        &self,
        id: &str,
        _title: &str,
        _content: &str,
        _folder_id: &str,
        existing_tag: Option<&str>,
    ) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::UpdateNote {
            id: id.to_string(),
            existing_tag: existing_tag.map(str::to_string),
        })
    }

    async fn delete_note(
        &self,
        id: &str,
        tag: Option<&str>,
        purge: bool,
    ) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::DeleteNote {
            id: id.to_string(),
            tag: tag.map(str::to_string),
            purge,
        })
    }

    async fn create_folder(&self, name: &str) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::CreateFolder {
            name: name.to_string(),
        })
    }

    async fn rename_folder(
        &self,
        id: &str,
        name: &str,
        _existing_tag: Option<&str>,
        _original_create_date: Option<Timestamp>,
    ) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::RenameFolder {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    async fn delete_folder(
        &self,
        id: &str,
        tag: Option<&str>,
        _purge: bool,
    ) -> Result<ApiResponse, RemoteError> {
        self.next(RemoteCall::DeleteFolder {
            id: id.to_string(),
            tag: tag.map(str::to_string),
        })
    }

    async fn download_attachment(
        &self,
        note_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        self.calls.lock().push(RemoteCall::DownloadAttachment {
            note_id: note_id.to_string(),
            attachment_id: attachment_id.to_string(),
        });
        Ok(Vec::new())
    }

    async fn fetch_page(&self, sync_tag: Option<&str>) -> Result<SyncPage, RemoteError> {
        self.calls.lock().push(RemoteCall::FetchPage {
            sync_tag: sync_tag.map(str::to_string),
        });
        Ok(SyncPage::default())
    }
}

// ============================================================================
// Engine fixture
// ============================================================================

pub struct TestEngine {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new();
        let clock = ManualClock::new(Utc::now());
        let engine = SyncEngine::new(
            SyncConfig::default(),
            store.clone(),
            remote.clone(),
            clock.clone(),
        );
        Self {
            engine,
            store,
            remote,
            clock,
        }
    }

    pub fn go_online(&self) {
        self.engine.online().set_connected(true);
        self.engine.online().set_authenticated(true);
    }

    pub fn go_offline(&self) {
        self.engine.online().set_connected(false);
    }

    /// Collect every event emitted from here on.
    pub fn event_log(&self) -> Arc<Mutex<Vec<SyncEvent>>> {
        collect_events(self.engine.events())
    }
}

pub fn collect_events(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<SyncEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    bus.subscribe(Arc::new(move |event| sink.lock().push(event.clone())));
    log
}
