//! Unified persistent operation queue.
//!
//! One durable queue for every outgoing intent (note uploads, deletes,
//! folder maintenance, attachments) with per-target deduplication, a small
//! status machine, and exponential-backoff retry bookkeeping.
//!
//! A single `parking_lot::Mutex` guards both the in-memory map and the
//! persistence call: mutating methods write through the store before the
//! lock drops, so any observer that takes the lock sees durable state
//! (queue durability invariant). Critical sections never touch the network.

pub mod op;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::storage::traits::SyncStore;
use crate::types::Timestamp;

use op::{ErrorKind, Operation, OperationKind, OperationStatus};

/// Snapshot counters for diagnostics and UI badges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStatistics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub auth_failed: usize,
    pub max_retry_exceeded: usize,
    pub oldest_pending: Option<Timestamp>,
}

struct Inner {
    ops: HashMap<String, Operation>,
}

pub struct OperationQueue {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    config: Arc<SyncConfig>,
    inner: Mutex<Inner>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>, config: Arc<SyncConfig>) -> Self {
        Self {
            store,
            clock,
            config,
            inner: Mutex::new(Inner {
                ops: HashMap::new(),
            }),
        }
    }

    /// Rehydrate the cache from the store. Rows stuck in `Processing`
    /// (crash mid-flight) go back to `Pending`. Returns the loaded count.
    pub fn load(&self) -> Result<usize> {
        let rows = self.store.load_operations()?;
        let mut inner = self.inner.lock();
        let mut requeued = 0usize;
        for mut op in rows {
            if op.status == OperationStatus::Processing {
                op.status = OperationStatus::Pending;
                self.store.put_operation(&op)?;
                requeued += 1;
            }
            inner.ops.insert(op.id.clone(), op);
        }
        let total = inner.ops.len();
        info!(total, requeued, "operation queue rehydrated");
        Ok(total)
    }

    // ========================================================================
    // Enqueue + merge
    // ========================================================================

    /// Persist a new operation, collapsing it against the target's existing
    /// non-terminal operations. Returns the accepted operation, or `None`
    /// when the new one was absorbed (idempotent create, upload after
    /// delete, create+delete annihilation).
    pub fn enqueue(&self, op: Operation) -> Result<Option<Operation>> {
        let mut inner = self.inner.lock();

        let existing: Vec<Operation> = inner
            .ops
            .values()
            .filter(|e| e.target_id == op.target_id && e.is_active())
            .cloned()
            .collect();

        let mut drop_new = false;
        let mut superseded: Vec<String> = Vec::new();

        match op.kind {
            OperationKind::NoteCreate => {
                // A second create for the same note is idempotent noise.
                drop_new = existing.iter().any(|e| e.kind == OperationKind::NoteCreate);
            }
            OperationKind::CloudUpload => {
                if existing.iter().any(|e| e.kind == OperationKind::CloudDelete) {
                    // The note is already on its way out.
                    drop_new = true;
                } else {
                    // Last write wins: replace any queued upload.
                    superseded.extend(
                        existing
                            .iter()
                            .filter(|e| e.kind == OperationKind::CloudUpload)
                            .map(|e| e.id.clone()),
                    );
                }
            }
            OperationKind::CloudDelete => {
                // Everything queued for this note is moot. If a create was
                // among them the entity never existed remotely, so the
                // delete itself is dropped too.
                drop_new = existing.iter().any(|e| e.kind == OperationKind::NoteCreate);
                superseded.extend(existing.iter().map(|e| e.id.clone()));
            }
            OperationKind::ImageUpload => {
                // Attachments never merge.
            }
            OperationKind::FolderCreate | OperationKind::FolderRename => {
                superseded.extend(
                    existing
                        .iter()
                        .filter(|e| e.kind == op.kind)
                        .map(|e| e.id.clone()),
                );
            }
            OperationKind::FolderDelete => {
                // Same-kind replacement plus every non-delete folder op.
                superseded.extend(existing.iter().map(|e| e.id.clone()));
            }
        }

        for id in &superseded {
            self.store.delete_operation(id)?;
            inner.ops.remove(id);
            debug!(op_id = %id, target = %op.target_id, "superseded by incoming operation");
        }

        if drop_new {
            debug!(kind = ?op.kind, target = %op.target_id, "incoming operation absorbed");
            return Ok(None);
        }

        self.store.put_operation(&op)?;
        debug!(op_id = %op.id, kind = ?op.kind, target = %op.target_id, "operation enqueued");
        inner.ops.insert(op.id.clone(), op.clone());
        Ok(Some(op))
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// Claim an operation for execution and return its current row (the
    /// targets may have been rewritten since the caller's snapshot).
    /// `None` if the row is gone (cancelled), already claimed, or parked in
    /// a terminal state.
    pub fn mark_processing(&self, id: &str) -> Result<Option<Operation>> {
        let mut inner = self.inner.lock();
        let Some(op) = inner.ops.get_mut(id) else {
            return Ok(None);
        };
        if op.status == OperationStatus::Processing || op.status.is_terminal() {
            return Ok(None);
        }
        op.status = OperationStatus::Processing;
        let snapshot = op.clone();
        self.store.put_operation(&snapshot)?;
        Ok(Some(snapshot))
    }

    /// Release a claim without recording a failure (the operation was not
    /// attempted). No-op for rows that are gone or not `Processing`.
    pub fn mark_pending(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(op) = inner.ops.get_mut(id) else {
            return Ok(());
        };
        if op.status != OperationStatus::Processing {
            return Ok(());
        }
        op.status = OperationStatus::Pending;
        let snapshot = op.clone();
        self.store.put_operation(&snapshot)?;
        Ok(())
    }

    /// Completion removes the row. A missing row means the operation was
    /// cancelled while in flight; that is absorbed as success.
    pub fn mark_completed(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let removed = inner.ops.remove(id);
        self.store.delete_operation(id)?;
        match removed {
            Some(op) => debug!(op_id = %id, kind = ?op.kind, "operation completed"),
            None => debug!(op_id = %id, "completed operation already cancelled"),
        }
        Ok(())
    }

    /// Record a failure. Auth expiry parks the row as `AuthFailed`; a spent
    /// retry budget parks it as `MaxRetryExceeded`; anything else is a
    /// retryable `Failed`.
    pub fn mark_failed(&self, id: &str, error: &str, kind: ErrorKind) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(op) = inner.ops.get_mut(id) else {
            return Ok(());
        };
        op.last_error = Some(error.to_string());
        op.error_kind = Some(kind);
        op.next_retry_at = None;
        op.status = if kind == ErrorKind::AuthExpired {
            OperationStatus::AuthFailed
        } else if op.retry_count >= self.config.max_retry {
            OperationStatus::MaxRetryExceeded
        } else {
            OperationStatus::Failed
        };
        if op.status.is_terminal() {
            warn!(op_id = %id, status = ?op.status, error, "operation parked");
        }
        let snapshot = op.clone();
        self.store.put_operation(&snapshot)?;
        Ok(())
    }

    /// Arm the next attempt: bump `retry_count`, set `Failed`, and stamp
    /// `next_retry_at` with the given delay or the backoff ladder.
    pub fn schedule_retry(&self, id: &str, delay: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(op) = inner.ops.get_mut(id) else {
            return Ok(());
        };
        op.retry_count += 1;
        op.status = OperationStatus::Failed;
        let delay = delay.unwrap_or_else(|| self.config.retry_delay(op.retry_count));
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| {
            chrono::Duration::seconds(self.config.max_retry_delay.as_secs() as i64)
        });
        op.next_retry_at = Some(now + delay);
        debug!(
            op_id = %id,
            retry_count = op.retry_count,
            next_retry_at = ?op.next_retry_at,
            "retry scheduled"
        );
        let snapshot = op.clone();
        self.store.put_operation(&snapshot)?;
        Ok(())
    }

    // ========================================================================
    // Scheduling views
    // ========================================================================

    /// Operations owed to the server, ordered (priority desc, created asc).
    pub fn pending(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .inner
            .lock()
            .ops
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    OperationStatus::Pending | OperationStatus::Failed
                )
            })
            .cloned()
            .collect();
        sort_for_dispatch(&mut ops);
        ops
    }

    /// Failed operations whose backoff window has elapsed.
    pub fn ready_for_retry(&self) -> Vec<Operation> {
        let now = self.clock.now();
        let mut ops: Vec<Operation> = self
            .inner
            .lock()
            .ops
            .values()
            .filter(|o| {
                o.status == OperationStatus::Failed
                    && o.next_retry_at.map_or(true, |at| now >= at)
            })
            .cloned()
            .collect();
        sort_for_dispatch(&mut ops);
        ops
    }

    // ========================================================================
    // Guard queries
    // ========================================================================

    /// Any non-terminal upload-class operation (`CloudUpload`/`NoteCreate`)
    /// for this note.
    pub fn has_pending_upload(&self, note_id: &str) -> bool {
        self.inner
            .lock()
            .ops
            .values()
            .any(|o| o.target_id == note_id && o.kind.is_upload() && o.is_active())
    }

    /// Latest user-visible save moment among this note's pending uploads.
    pub fn local_save_timestamp(&self, note_id: &str) -> Option<Timestamp> {
        self.inner
            .lock()
            .ops
            .values()
            .filter(|o| o.target_id == note_id && o.kind.is_upload() && o.is_active())
            .filter_map(|o| o.local_save_at)
            .max()
    }

    pub fn has_pending_note_create(&self, note_id: &str) -> bool {
        self.inner
            .lock()
            .ops
            .values()
            .any(|o| {
                o.target_id == note_id
                    && o.kind == OperationKind::NoteCreate
                    && o.is_active()
            })
    }

    /// Any non-terminal upload-class operation at all. Gates sync-tag
    /// confirmation.
    pub fn has_pending_uploads(&self) -> bool {
        self.inner
            .lock()
            .ops
            .values()
            .any(|o| o.kind.is_upload() && o.is_active())
    }

    // ========================================================================
    // Bulk rewrites
    // ========================================================================

    /// Rewrite `target_id` on every row for this target and clear the
    /// temporary-id flag. Called after the server assigns a real id.
    pub fn update_note_id(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .ops
            .values()
            .filter(|o| o.target_id == old_id)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            if let Some(op) = inner.ops.get_mut(id) {
                op.target_id = new_id.to_string();
                op.is_local_id = false;
                let snapshot = op.clone();
                self.store.put_operation(&snapshot)?;
            }
        }
        if !ids.is_empty() {
            debug!(old = %old_id, new = %new_id, count = ids.len(), "queue targets rewritten");
        }
        Ok(())
    }

    /// Drop every row for this target. In-flight executions finish and are
    /// absorbed on `mark_completed`.
    pub fn cancel_operations(&self, target_id: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .ops
            .values()
            .filter(|o| o.target_id == target_id)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            self.store.delete_operation(id)?;
            inner.ops.remove(id);
        }
        if !ids.is_empty() {
            debug!(target = %target_id, count = ids.len(), "operations cancelled");
        }
        Ok(ids.len())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop rows whose retry budget is spent. Returns how many.
    pub fn clear_terminal(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .ops
            .values()
            .filter(|o| o.status == OperationStatus::MaxRetryExceeded)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            self.store.delete_operation(id)?;
            inner.ops.remove(id);
        }
        Ok(ids.len())
    }

    /// Re-arm operations parked by an auth failure after the host refreshes
    /// credentials.
    pub fn reset_auth_failed(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .ops
            .values()
            .filter(|o| o.status == OperationStatus::AuthFailed)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            if let Some(op) = inner.ops.get_mut(id) {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                op.next_retry_at = None;
                op.last_error = None;
                op.error_kind = None;
                let snapshot = op.clone();
                self.store.put_operation(&snapshot)?;
            }
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "auth-failed operations re-armed");
        }
        Ok(ids.len())
    }

    pub fn statistics(&self) -> QueueStatistics {
        let inner = self.inner.lock();
        let mut stats = QueueStatistics {
            total: inner.ops.len(),
            ..Default::default()
        };
        for op in inner.ops.values() {
            match op.status {
                OperationStatus::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending = match stats.oldest_pending {
                        Some(ts) if ts <= op.created_at => Some(ts),
                        _ => Some(op.created_at),
                    };
                }
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::AuthFailed => stats.auth_failed += 1,
                OperationStatus::MaxRetryExceeded => stats.max_retry_exceeded += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ops.is_empty()
    }

    /// Current row by id, if still present.
    pub fn get(&self, id: &str) -> Option<Operation> {
        self.inner.lock().ops.get(id).cloned()
    }
}

fn sort_for_dispatch(ops: &mut [Operation]) {
    ops.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
