//! Persistence port.
//!
//! Narrow, synchronous interface the queue, registry, and sync-tag manager
//! persist through. Implementations must provide linearizable single-row
//! writes; the two `rewrite_*` compounds must be atomic over their row set
//! (a transaction in SQLite, one lock in memory) and idempotent when the
//! old row is already gone, because registry recovery replays them.

use crate::error::StoreError;
use crate::queue::op::Operation;
use crate::types::{Folder, IdMapping, Note, SyncStatus};

pub trait SyncStore: Send + Sync {
    // --- notes ---
    fn get_note(&self, id: &str) -> Result<Option<Note>, StoreError>;
    fn put_note(&self, note: &Note) -> Result<(), StoreError>;
    fn delete_note(&self, id: &str) -> Result<(), StoreError>;
    fn note_ids_in_folder(&self, folder_id: &str) -> Result<Vec<String>, StoreError>;

    // --- folders ---
    fn get_folder(&self, id: &str) -> Result<Option<Folder>, StoreError>;
    fn put_folder(&self, folder: &Folder) -> Result<(), StoreError>;
    fn delete_folder(&self, id: &str) -> Result<(), StoreError>;

    // --- operations ---
    /// Upsert by `op.id`.
    fn put_operation(&self, op: &Operation) -> Result<(), StoreError>;
    fn delete_operation(&self, id: &str) -> Result<(), StoreError>;
    fn load_operations(&self) -> Result<Vec<Operation>, StoreError>;

    // --- id mappings ---
    fn put_mapping(&self, mapping: &IdMapping) -> Result<(), StoreError>;
    fn get_mapping(&self, local_id: &str) -> Result<Option<IdMapping>, StoreError>;
    fn load_mappings(&self) -> Result<Vec<IdMapping>, StoreError>;
    fn delete_mapping(&self, local_id: &str) -> Result<(), StoreError>;
    /// Returns how many rows were removed.
    fn delete_completed_mappings(&self) -> Result<usize, StoreError>;

    // --- sync status singleton ---
    fn get_sync_status(&self) -> Result<SyncStatus, StoreError>;
    fn put_sync_status(&self, status: &SyncStatus) -> Result<(), StoreError>;

    // --- compound rewrites ---
    /// Re-key a note row from `old_id` to `new_id`. Replay-safe: a missing
    /// `old_id` is a no-op, and if `new_id` already exists that row is kept
    /// and the stale `old_id` row is dropped.
    fn rewrite_note_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError>;

    /// Re-key a folder row from `old_id` to `new_id` AND point every note
    /// under `old_id` at `new_id`, atomically. Replay-safe under the same
    /// rules as `rewrite_note_id`.
    fn rewrite_folder_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError>;
}
