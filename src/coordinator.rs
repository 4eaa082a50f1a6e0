//! Operation coordinator.
//!
//! Owns the active-editing state and orchestrates local saves: persist
//! locally first, collapse the upload into the queue, then kick the
//! processor if we are online. Methods serialize on an internal async
//! mutex so save/create/delete interleavings cannot race each other.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::guard::SyncGuard;
use crate::online::OnlineState;
use crate::processor::OperationProcessor;
use crate::queue::op::{Operation, OperationKind, OperationPayload};
use crate::queue::OperationQueue;
use crate::registry::IdMappingRegistry;
use crate::storage::traits::SyncStore;
use crate::temp_id;
use crate::types::{Note, Timestamp};

/// What to do with a remote copy that collides with local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    KeepLocal,
    UseCloud,
    /// The note does not exist locally; nothing to resolve.
    Skip,
}

/// Shared cell holding the note currently open in the editor.
///
/// The coordinator writes it, the guard reads it, and id-change handling
/// retargets it when a temporary id is retired.
#[derive(Clone, Default)]
pub struct ActiveEditing(Arc<Mutex<Option<String>>>);

impl ActiveEditing {
    pub fn set(&self, note_id: Option<String>) {
        *self.0.lock() = note_id;
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    pub fn is_editing(&self, note_id: &str) -> bool {
        self.0.lock().as_deref() == Some(note_id)
    }

    /// Swap `old` for `new` if `old` is the current value.
    pub fn retarget(&self, old: &str, new: &str) {
        let mut cell = self.0.lock();
        if cell.as_deref() == Some(old) {
            *cell = Some(new.to_string());
        }
    }

    fn clear_if(&self, note_id: &str) {
        let mut cell = self.0.lock();
        if cell.as_deref() == Some(note_id) {
            *cell = None;
        }
    }
}

pub struct NoteCoordinator {
    store: Arc<dyn SyncStore>,
    queue: Arc<OperationQueue>,
    registry: Arc<IdMappingRegistry>,
    guard: Arc<SyncGuard>,
    processor: Arc<OperationProcessor>,
    online: Arc<OnlineState>,
    clock: Arc<dyn Clock>,
    config: Arc<SyncConfig>,
    active: ActiveEditing,
    /// Serializes the mutating entry points.
    serial: tokio::sync::Mutex<()>,
}

impl NoteCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SyncStore>,
        queue: Arc<OperationQueue>,
        registry: Arc<IdMappingRegistry>,
        guard: Arc<SyncGuard>,
        processor: Arc<OperationProcessor>,
        online: Arc<OnlineState>,
        clock: Arc<dyn Clock>,
        config: Arc<SyncConfig>,
        active: ActiveEditing,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            guard,
            processor,
            online,
            clock,
            config,
            active,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    // ========================================================================
    // Saves
    // ========================================================================

    /// Persist a note locally and queue its upload. The local write is the
    /// save; a failed enqueue only delays the upload and is not an error.
    pub async fn save_note(&self, note: &Note) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.save_inner(note).await
    }

    /// Same as `save_note`; callers use this to bypass any debouncing they
    /// layer on top of the editor.
    pub async fn save_note_immediately(&self, note: &Note) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.save_inner(note).await
    }

    async fn save_inner(&self, note: &Note) -> Result<()> {
        if note.id.is_empty() {
            return Err(SyncError::InvalidNoteData("empty note id".into()));
        }
        let now = self.clock.now();

        let mut stored = note.clone();
        stored.updated_at = now;
        self.store.put_note(&stored)?;

        let is_local = temp_id::is_temporary(&note.id, &self.config.temporary_id_prefix);
        let op = Operation::new(
            OperationKind::CloudUpload,
            note.id.clone(),
            OperationPayload::Note {
                title: stored.title.clone(),
                content: stored.content.clone(),
                folder_id: stored.folder_id.clone(),
            },
            now,
        )
        .with_local_save_at(now)
        .with_local_id(is_local);

        let queued = match self.queue.enqueue(op) {
            Ok(queued) => queued,
            Err(e) => {
                // Local data is safe; the upload rides the next save.
                warn!(note = %note.id, error = %e, "upload enqueue failed after local save");
                return Ok(());
            }
        };

        if let Some(op) = queued {
            if self.online.is_online() {
                if let Err(e) = self.processor.process_immediately(&op).await {
                    warn!(note = %note.id, error = %e, "immediate upload failed; left queued");
                }
            }
        }
        Ok(())
    }

    /// Create a note while offline: temporary id, local row, queued create.
    pub async fn create_note_offline(
        &self,
        title: &str,
        content: &str,
        folder_id: &str,
    ) -> Result<Note> {
        let _serial = self.serial.lock().await;
        let now = self.clock.now();
        let id = temp_id::generate(&self.config.temporary_id_prefix);

        let note = Note {
            id: id.clone(),
            folder_id: folder_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            server_tag: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_note(&note)?;

        let op = Operation::new(
            OperationKind::NoteCreate,
            id.clone(),
            OperationPayload::Note {
                title: title.to_string(),
                content: content.to_string(),
                folder_id: folder_id.to_string(),
            },
            now,
        )
        .with_local_save_at(now)
        .with_local_id(true);
        self.queue.enqueue(op)?;

        debug!(note = %id, "note created offline");
        Ok(note)
    }

    // ========================================================================
    // Active editing
    // ========================================================================

    pub fn set_active_editing(&self, note_id: Option<String>) {
        self.active.set(note_id);
    }

    pub fn is_actively_editing(&self, note_id: &str) -> bool {
        self.active.is_editing(note_id)
    }

    pub fn active_editing(&self) -> Option<String> {
        self.active.get()
    }

    // ========================================================================
    // Sync-side decisions
    // ========================================================================

    /// Whether a remote copy of `note_id` may be written to the store.
    pub fn can_sync_update(&self, note_id: &str, cloud_ts: Timestamp) -> bool {
        !self.guard.should_skip(note_id, cloud_ts)
    }

    /// Decide a local/cloud collision. Pending local work always wins; a
    /// missing local row means there is nothing to resolve.
    pub fn resolve_conflict(&self, note_id: &str, _cloud_ts: Timestamp) -> Result<ConflictResolution> {
        if temp_id::is_temporary(note_id, &self.config.temporary_id_prefix) {
            return Ok(ConflictResolution::KeepLocal);
        }
        if self.active.is_editing(note_id) {
            return Ok(ConflictResolution::KeepLocal);
        }
        if self.queue.has_pending_upload(note_id) {
            return Ok(ConflictResolution::KeepLocal);
        }
        if self.store.get_note(note_id)?.is_none() {
            return Ok(ConflictResolution::Skip);
        }
        Ok(ConflictResolution::UseCloud)
    }

    // ========================================================================
    // Id reconciliation
    // ========================================================================

    /// Finish retiring a temporary id after the processor reports a create
    /// success: replay the reference rewrite (idempotent), follow the
    /// editor if it had the note open, and complete the mapping.
    pub fn handle_note_create_success(&self, temp_id: &str, server_id: &str) -> Result<()> {
        self.registry.update_all_references(temp_id, server_id)?;
        self.active.retarget(temp_id, server_id);
        self.registry.mark_completed(temp_id)?;
        Ok(())
    }

    /// Discard a note that only ever existed locally: cancel its queued
    /// operations, drop the row, release the editor.
    pub async fn delete_temporary_note(&self, note_id: &str) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.queue.cancel_operations(note_id)?;
        self.store.delete_note(note_id)?;
        self.active.clear_if(note_id);
        debug!(note = %note_id, "temporary note deleted");
        Ok(())
    }
}
