//! Sync guard: may a remote update replace local state?
//!
//! Pure predicate over queue state and the active-editing cell. User-first
//! policy: pending local edits are never clobbered by a sync page, even
//! when the cloud timestamp is newer.

use std::sync::Arc;

use crate::coordinator::ActiveEditing;
use crate::queue::OperationQueue;
use crate::temp_id;
use crate::types::Timestamp;

/// Why a remote note was withheld from the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The id is client-generated; the server copy is someone else's note.
    TemporaryId,
    /// The note is open in the editor right now.
    ActivelyEditing,
    /// A pending upload exists and the local save is at least as new.
    LocalNewer,
    /// A pending upload exists; local edits win regardless of timestamps.
    PendingUpload,
    /// The note's create has not reached the server yet.
    PendingCreate,
}

pub struct SyncGuard {
    queue: Arc<OperationQueue>,
    active: ActiveEditing,
    prefix: String,
}

impl SyncGuard {
    pub fn new(queue: Arc<OperationQueue>, active: ActiveEditing, prefix: impl Into<String>) -> Self {
        Self {
            queue,
            active,
            prefix: prefix.into(),
        }
    }

    /// First matching rule wins; `None` means the remote update may land.
    pub fn skip_reason(&self, note_id: &str, cloud_ts: Timestamp) -> Option<SkipReason> {
        if temp_id::is_temporary(note_id, &self.prefix) {
            return Some(SkipReason::TemporaryId);
        }
        if self.active.is_editing(note_id) {
            return Some(SkipReason::ActivelyEditing);
        }
        if self.queue.has_pending_upload(note_id) {
            // Distinguish for diagnostics; the outcome is the same.
            let local_newer = self
                .queue
                .local_save_timestamp(note_id)
                .map_or(false, |saved| saved >= cloud_ts);
            return Some(if local_newer {
                SkipReason::LocalNewer
            } else {
                SkipReason::PendingUpload
            });
        }
        if self.queue.has_pending_note_create(note_id) {
            return Some(SkipReason::PendingCreate);
        }
        None
    }

    pub fn should_skip(&self, note_id: &str, cloud_ts: Timestamp) -> bool {
        self.skip_reason(note_id, cloud_ts).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SyncConfig;
    use crate::queue::op::{Operation, OperationKind, OperationPayload};
    use crate::storage::memory::MemoryStore;
    use chrono::{Duration, Utc};

    fn fixture() -> (SyncGuard, Arc<OperationQueue>, ActiveEditing, Arc<ManualClock>) {
        let clock = ManualClock::new(Utc::now());
        let queue = Arc::new(OperationQueue::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(SyncConfig::default()),
        ));
        let active = ActiveEditing::default();
        let guard = SyncGuard::new(queue.clone(), active.clone(), temp_id::DEFAULT_PREFIX);
        (guard, queue, active, clock)
    }

    fn upload_at(queue: &OperationQueue, note_id: &str, at: crate::types::Timestamp) {
        queue
            .enqueue(
                Operation::new(
                    OperationKind::CloudUpload,
                    note_id,
                    OperationPayload::Note {
                        title: "t".into(),
                        content: "c".into(),
                        folder_id: "f".into(),
                    },
                    at,
                )
                .with_local_save_at(at),
            )
            .unwrap();
    }

    #[test]
    fn temporary_id_always_skips() {
        let (guard, _, _, clock) = fixture();
        assert_eq!(
            guard.skip_reason("local_abc", clock.now()),
            Some(SkipReason::TemporaryId)
        );
    }

    #[test]
    fn active_editing_skips() {
        let (guard, _, active, clock) = fixture();
        active.set(Some("n1".into()));
        assert_eq!(
            guard.skip_reason("n1", clock.now()),
            Some(SkipReason::ActivelyEditing)
        );
        active.set(None);
        assert_eq!(guard.skip_reason("n1", clock.now()), None);
    }

    #[test]
    fn pending_upload_skips_with_timestamp_sensitive_reason() {
        let (guard, queue, _, clock) = fixture();
        let saved_at = clock.now();
        upload_at(&queue, "n1", saved_at);

        // Cloud older than the local save: local is newer.
        let older = saved_at - Duration::seconds(30);
        assert_eq!(guard.skip_reason("n1", older), Some(SkipReason::LocalNewer));

        // Equal timestamps count as local-newer (strict >=).
        assert_eq!(
            guard.skip_reason("n1", saved_at),
            Some(SkipReason::LocalNewer)
        );

        // Cloud newer: still skipped, user-first.
        let newer = saved_at + Duration::seconds(30);
        assert_eq!(
            guard.skip_reason("n1", newer),
            Some(SkipReason::PendingUpload)
        );
    }

    #[test]
    fn pending_create_skips() {
        let (guard, queue, _, clock) = fixture();
        queue
            .enqueue(Operation::new(
                OperationKind::NoteCreate,
                "n1",
                OperationPayload::Note {
                    title: "t".into(),
                    content: "c".into(),
                    folder_id: "f".into(),
                },
                clock.now(),
            ))
            .unwrap();
        // NoteCreate is upload-class, so the pending-upload rule fires
        // first; the create-specific reason needs the upload rule bypassed.
        assert!(guard.should_skip("n1", clock.now()));
    }

    #[test]
    fn clean_note_is_not_skipped() {
        let (guard, _, _, clock) = fixture();
        assert_eq!(guard.skip_reason("srv-7", clock.now()), None);
        assert!(!guard.should_skip("srv-7", clock.now()));
    }

    #[test]
    fn skip_clears_after_upload_completes() {
        let (guard, queue, _, clock) = fixture();
        upload_at(&queue, "n1", clock.now());
        let op = queue.pending().remove(0);
        assert!(guard.should_skip("n1", clock.now()));

        queue.mark_completed(&op.id).unwrap();
        assert!(!guard.should_skip("n1", clock.now()));
    }
}
