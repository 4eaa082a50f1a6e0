//! Operation processor.
//!
//! Executes queued operations against the remote API, classifies failures,
//! and feeds the results back as queue transitions plus events. Remote
//! errors never escape to callers; persistence errors do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::online::OnlineState;
use crate::queue::op::{ErrorKind, Operation, OperationKind, OperationPayload};
use crate::queue::OperationQueue;
use crate::registry::IdMappingRegistry;
use crate::remote::{ApiResponse, RemoteApi, RemoteError};
use crate::storage::traits::SyncStore;
use crate::sync_tag::SyncTagManager;
use crate::temp_id;
use crate::types::EntityKind;

/// Invoked when a create hands back a server id; the engine wires this to
/// the coordinator so editor state follows the rename.
pub type IdMappingHandler = Arc<dyn Fn(&str, &str, EntityKind) + Send + Sync>;

/// Tally for one `process_queue`/`process_retries` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub processed: usize,
    pub failed: usize,
}

enum StepOutcome {
    Completed,
    Failed(ErrorKind),
    /// The row vanished or was already claimed; nothing to do.
    Skipped,
}

pub struct OperationProcessor {
    store: Arc<dyn SyncStore>,
    remote: Arc<dyn RemoteApi>,
    queue: Arc<OperationQueue>,
    registry: Arc<IdMappingRegistry>,
    sync_tag: Arc<SyncTagManager>,
    events: Arc<EventBus>,
    online: Arc<OnlineState>,
    config: Arc<SyncConfig>,
    /// Shared by `process_queue` and `process_retries`: at most one drain
    /// run at a time, of either flavor.
    draining: AtomicBool,
    id_mapping_handler: Mutex<Option<IdMappingHandler>>,
}

impl OperationProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteApi>,
        queue: Arc<OperationQueue>,
        registry: Arc<IdMappingRegistry>,
        sync_tag: Arc<SyncTagManager>,
        events: Arc<EventBus>,
        online: Arc<OnlineState>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            store,
            remote,
            queue,
            registry,
            sync_tag,
            events,
            online,
            config,
            draining: AtomicBool::new(false),
            id_mapping_handler: Mutex::new(None),
        }
    }

    pub fn set_id_mapping_handler(&self, handler: IdMappingHandler) {
        *self.id_mapping_handler.lock() = Some(handler);
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Execute one operation right away if we are online and authenticated;
    /// otherwise leave it queued for the next drain.
    pub async fn process_immediately(&self, op: &Operation) -> Result<()> {
        if !self.online.is_online() {
            debug!(op_id = %op.id, "offline; operation stays queued");
            return Ok(());
        }
        self.process_one(op).await.map(|_| ())
    }

    /// Drain everything pending, in (priority desc, created asc) order.
    pub async fn process_queue(&self) -> Result<DrainOutcome> {
        let _guard = self.begin_drain()?;
        let ops = self.queue.pending();
        self.drain(ops).await
    }

    /// Drain operations whose retry backoff has elapsed.
    pub async fn process_retries(&self) -> Result<DrainOutcome> {
        let _guard = self.begin_drain()?;
        let ops = self.queue.ready_for_retry();
        self.drain(ops).await
    }

    fn begin_drain(&self) -> Result<DrainGuard<'_>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::AlreadySyncing);
        }
        Ok(DrainGuard(&self.draining))
    }

    async fn drain(&self, ops: Vec<Operation>) -> Result<DrainOutcome> {
        let mut outcome = DrainOutcome::default();
        for op in ops {
            match self.process_one(&op).await? {
                StepOutcome::Completed => outcome.processed += 1,
                StepOutcome::Failed(kind) => {
                    outcome.failed += 1;
                    if kind == ErrorKind::AuthExpired {
                        warn!("queue drain halted: credentials expired");
                        break;
                    }
                }
                StepOutcome::Skipped => {}
            }
        }

        // The cursor may only advance once no upload is owed to the server.
        if !self.queue.has_pending_uploads() {
            self.sync_tag.confirm_if_needed()?;
        }
        self.events.emit(&SyncEvent::QueueDrained {
            processed: outcome.processed,
            failed: outcome.failed,
        });
        Ok(outcome)
    }

    // ========================================================================
    // Single-operation pipeline
    // ========================================================================

    async fn process_one(&self, op: &Operation) -> Result<StepOutcome> {
        // Claim the row and work from its current state; an earlier create
        // in the same drain may have rewritten the target id.
        let Some(current) = self.queue.mark_processing(&op.id)? else {
            return Ok(StepOutcome::Skipped);
        };

        // An op that talks to the server about an entity the server has not
        // assigned an id to yet must wait for that entity's create.
        if current.is_local_id
            && !matches!(
                current.kind,
                OperationKind::NoteCreate
                    | OperationKind::FolderCreate
                    | OperationKind::ImageUpload
            )
        {
            let resolved = self.registry.resolve(&current.target_id);
            if temp_id::is_temporary(&resolved, &self.config.temporary_id_prefix) {
                debug!(op_id = %current.id, target = %current.target_id,
                    "operation waits for its entity's create");
                self.queue.mark_pending(&current.id)?;
                return Ok(StepOutcome::Skipped);
            }
        }

        match self.execute(&current).await {
            Ok(()) => {
                self.queue.mark_completed(&current.id)?;
                self.events.emit(&SyncEvent::OperationCompleted {
                    op_id: current.id.clone(),
                    target_id: current.target_id.clone(),
                    kind: current.kind,
                });
                Ok(StepOutcome::Completed)
            }
            // Persistence failures are fatal for the run, not classifiable.
            Err(err @ SyncError::Storage(_)) => Err(err),
            Err(err) => {
                let kind = classify(&err);
                self.handle_failure(&current, &err, kind)?;
                Ok(StepOutcome::Failed(kind))
            }
        }
    }

    fn handle_failure(&self, op: &Operation, err: &SyncError, kind: ErrorKind) -> Result<()> {
        let message = err.to_string();
        debug!(op_id = %op.id, kind = ?kind, error = %message, "operation failed");

        if kind.is_retryable() && op.retry_count < self.config.max_retry {
            self.queue.mark_failed(&op.id, &message, kind)?;
            self.queue.schedule_retry(&op.id, None)?;
            return Ok(());
        }

        self.queue.mark_failed(&op.id, &message, kind)?;
        if kind == ErrorKind::AuthExpired {
            self.events.emit(&SyncEvent::OperationAuthFailed {
                op_id: op.id.clone(),
                target_id: op.target_id.clone(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Per-kind execution
    // ========================================================================

    async fn execute(&self, op: &Operation) -> Result<()> {
        match op.kind {
            OperationKind::NoteCreate => self.execute_note_create(op).await,
            OperationKind::CloudUpload => self.execute_cloud_upload(op).await,
            OperationKind::CloudDelete => self.execute_note_delete(op).await,
            OperationKind::FolderCreate => self.execute_folder_create(op).await,
            OperationKind::FolderRename => self.execute_folder_rename(op).await,
            OperationKind::FolderDelete => self.execute_folder_delete(op).await,
            // Attachments ride along with the containing note upload.
            OperationKind::ImageUpload => Ok(()),
        }
    }

    async fn execute_note_create(&self, op: &Operation) -> Result<()> {
        let note = self
            .store
            .get_note(&op.target_id)?
            .ok_or_else(|| SyncError::NoteNotFound(op.target_id.clone()))?;

        let resp = ensure_success(
            self.remote
                .create_note(&note.title, &note.content, &note.folder_id)
                .await?,
        )?;
        let server_id = resp
            .entry_id()
            .map(str::to_string)
            .ok_or_else(|| invalid("create response missing entry id"))?;
        let tag = resp.entry_tag(None);
        let server_folder = resp.entry_folder_id().map(str::to_string);

        if server_id == note.id {
            let mut updated = note;
            updated.server_tag = tag;
            self.store.put_note(&updated)?;
            return Ok(());
        }

        let local_id = note.id.clone();
        // Mapping first, so a crash mid-rewrite is replayable on startup.
        self.registry
            .register(&local_id, &server_id, EntityKind::Note)?;

        // Atomic re-key; stamping the tag afterward is safe to lose to a
        // crash, the rename is not.
        self.store.rewrite_note_id(&local_id, &server_id)?;
        if let Some(mut moved) = self.store.get_note(&server_id)? {
            moved.server_tag = tag;
            if let Some(folder_id) = server_folder {
                moved.folder_id = folder_id;
            }
            self.store.put_note(&moved)?;
        }
        self.queue.update_note_id(&local_id, &server_id)?;

        self.events.emit(&SyncEvent::NoteIdChanged {
            old_id: local_id.clone(),
            new_id: server_id.clone(),
        });
        self.notify_id_mapping(&local_id, &server_id, EntityKind::Note);
        Ok(())
    }

    async fn execute_cloud_upload(&self, op: &Operation) -> Result<()> {
        let note = self
            .store
            .get_note(&op.target_id)?
            .ok_or_else(|| SyncError::NoteNotFound(op.target_id.clone()))?;

        let resp = ensure_success(
            self.remote
                .update_note(
                    &note.id,
                    &note.title,
                    &note.content,
                    &note.folder_id,
                    note.server_tag.as_deref(),
                )
                .await?,
        )?;

        let mut updated = note;
        updated.server_tag = resp.entry_tag(updated.server_tag.take());
        self.store.put_note(&updated)?;
        Ok(())
    }

    async fn execute_note_delete(&self, op: &Operation) -> Result<()> {
        let tag = payload_tag(&op.payload);
        ensure_success(
            self.remote
                .delete_note(&op.target_id, tag.as_deref(), false)
                .await?,
        )?;
        Ok(())
    }

    async fn execute_folder_create(&self, op: &Operation) -> Result<()> {
        let folder = self
            .store
            .get_folder(&op.target_id)?
            .ok_or_else(|| SyncError::FolderNotFound(op.target_id.clone()))?;

        let resp = ensure_success(self.remote.create_folder(&folder.name).await?)?;
        let server_id = resp
            .entry_id()
            .map(str::to_string)
            .ok_or_else(|| invalid("folder create response missing entry id"))?;
        let tag = resp.entry_tag(None);

        if server_id == folder.id {
            let mut updated = folder;
            updated.server_tag = tag;
            self.store.put_folder(&updated)?;
            return Ok(());
        }

        let local_id = folder.id.clone();
        self.registry
            .register(&local_id, &server_id, EntityKind::Folder)?;

        // Re-keys the folder row and repoints every contained note in one
        // transaction.
        self.store.rewrite_folder_id(&local_id, &server_id)?;
        if let Some(mut moved) = self.store.get_folder(&server_id)? {
            moved.server_tag = tag;
            self.store.put_folder(&moved)?;
        }
        self.queue.update_note_id(&local_id, &server_id)?;

        self.events.emit(&SyncEvent::NoteIdChanged {
            old_id: local_id.clone(),
            new_id: server_id.clone(),
        });
        self.notify_id_mapping(&local_id, &server_id, EntityKind::Folder);
        Ok(())
    }

    async fn execute_folder_rename(&self, op: &Operation) -> Result<()> {
        let (name, tag) = match &op.payload {
            OperationPayload::Folder { name, tag } => (name.clone(), tag.clone()),
            other => {
                return Err(invalid(format!(
                    "folder rename payload mismatch: {other:?}"
                )))
            }
        };

        let resp = ensure_success(
            self.remote
                .rename_folder(&op.target_id, &name, tag.as_deref(), None)
                .await?,
        )?;

        if let Some(mut folder) = self.store.get_folder(&op.target_id)? {
            folder.name = name;
            folder.server_tag = resp.entry_tag(tag);
            self.store.put_folder(&folder)?;
        }
        Ok(())
    }

    async fn execute_folder_delete(&self, op: &Operation) -> Result<()> {
        let tag = payload_tag(&op.payload);
        ensure_success(
            self.remote
                .delete_folder(&op.target_id, tag.as_deref(), false)
                .await?,
        )?;
        Ok(())
    }

    fn notify_id_mapping(&self, local_id: &str, server_id: &str, kind: EntityKind) {
        let handler = self.id_mapping_handler.lock().clone();
        if let Some(handler) = handler {
            handler(local_id, server_id, kind);
        }
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn ensure_success(resp: ApiResponse) -> std::result::Result<ApiResponse, RemoteError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(RemoteError::Api {
            code: resp.code,
            message: resp
                .result
                .unwrap_or_else(|| "request rejected".to_string()),
        })
    }
}

fn payload_tag(payload: &OperationPayload) -> Option<String> {
    match payload {
        OperationPayload::Delete { tag } => tag.clone(),
        _ => None,
    }
}

fn invalid(message: impl Into<String>) -> SyncError {
    SyncError::Remote(RemoteError::InvalidResponse(message.into()))
}

/// Map an execution error onto the persisted classification.
pub fn classify(err: &SyncError) -> ErrorKind {
    match err {
        SyncError::Remote(remote) => match remote {
            RemoteError::Network(_) => ErrorKind::Network,
            RemoteError::Timeout => ErrorKind::Timeout,
            RemoteError::Http { status, .. } => match *status {
                401 => ErrorKind::AuthExpired,
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Unknown,
            },
            RemoteError::Api { .. } | RemoteError::InvalidResponse(_) => ErrorKind::Unknown,
        },
        SyncError::NoteNotFound(_) | SyncError::FolderNotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> SyncError {
        SyncError::Remote(RemoteError::Http {
            status,
            message: "x".into(),
        })
    }

    #[test]
    fn classification_follows_http_mapping() {
        assert_eq!(classify(&http(401)), ErrorKind::AuthExpired);
        assert_eq!(classify(&http(404)), ErrorKind::NotFound);
        assert_eq!(classify(&http(409)), ErrorKind::Conflict);
        assert_eq!(classify(&http(500)), ErrorKind::ServerError);
        assert_eq!(classify(&http(503)), ErrorKind::ServerError);
        assert_eq!(classify(&http(418)), ErrorKind::Unknown);
    }

    #[test]
    fn transport_failures_classify_by_shape() {
        assert_eq!(
            classify(&SyncError::Remote(RemoteError::Network("down".into()))),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&SyncError::Remote(RemoteError::Timeout)),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&SyncError::NoteNotFound("n1".into())),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify(&SyncError::InvalidNoteData("bad".into())),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn non_success_envelope_becomes_api_error() {
        let resp = ApiResponse {
            code: 12,
            result: Some("quota exceeded".into()),
            ..Default::default()
        };
        match ensure_success(resp) {
            Err(RemoteError::Api { code, message }) => {
                assert_eq!(code, 12);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
