//! In-memory `SyncStore`.
//!
//! Reference semantics for the port and the default store in tests. All
//! tables live in `HashMap`s under a single `parking_lot::Mutex`, which
//! makes the compound rewrites trivially atomic.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::queue::op::Operation;
use crate::types::{Folder, IdMapping, Note, SyncStatus};

use super::traits::SyncStore;

#[derive(Default)]
struct Tables {
    notes: HashMap<String, Note>,
    folders: HashMap<String, Folder>,
    operations: HashMap<String, Operation>,
    mappings: HashMap<String, IdMapping>,
    sync_status: SyncStatus,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStore for MemoryStore {
    fn get_note(&self, id: &str) -> Result<Option<Note>, StoreError> {
        Ok(self.tables.lock().notes.get(id).cloned())
    }

    fn put_note(&self, note: &Note) -> Result<(), StoreError> {
        self.tables.lock().notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        self.tables.lock().notes.remove(id);
        Ok(())
    }

    fn note_ids_in_folder(&self, folder_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables
            .lock()
            .notes
            .values()
            .filter(|n| n.folder_id == folder_id)
            .map(|n| n.id.clone())
            .collect())
    }

    fn get_folder(&self, id: &str) -> Result<Option<Folder>, StoreError> {
        Ok(self.tables.lock().folders.get(id).cloned())
    }

    fn put_folder(&self, folder: &Folder) -> Result<(), StoreError> {
        self.tables
            .lock()
            .folders
            .insert(folder.id.clone(), folder.clone());
        Ok(())
    }

    fn delete_folder(&self, id: &str) -> Result<(), StoreError> {
        self.tables.lock().folders.remove(id);
        Ok(())
    }

    fn put_operation(&self, op: &Operation) -> Result<(), StoreError> {
        self.tables
            .lock()
            .operations
            .insert(op.id.clone(), op.clone());
        Ok(())
    }

    fn delete_operation(&self, id: &str) -> Result<(), StoreError> {
        self.tables.lock().operations.remove(id);
        Ok(())
    }

    fn load_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.tables.lock().operations.values().cloned().collect())
    }

    fn put_mapping(&self, mapping: &IdMapping) -> Result<(), StoreError> {
        self.tables
            .lock()
            .mappings
            .insert(mapping.local_id.clone(), mapping.clone());
        Ok(())
    }

    fn get_mapping(&self, local_id: &str) -> Result<Option<IdMapping>, StoreError> {
        Ok(self.tables.lock().mappings.get(local_id).cloned())
    }

    fn load_mappings(&self) -> Result<Vec<IdMapping>, StoreError> {
        Ok(self.tables.lock().mappings.values().cloned().collect())
    }

    fn delete_mapping(&self, local_id: &str) -> Result<(), StoreError> {
        self.tables.lock().mappings.remove(local_id);
        Ok(())
    }

    fn delete_completed_mappings(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.mappings.len();
        tables.mappings.retain(|_, m| !m.completed);
        Ok(before - tables.mappings.len())
    }

    fn get_sync_status(&self) -> Result<SyncStatus, StoreError> {
        Ok(self.tables.lock().sync_status.clone())
    }

    fn put_sync_status(&self, status: &SyncStatus) -> Result<(), StoreError> {
        self.tables.lock().sync_status = status.clone();
        Ok(())
    }

    fn rewrite_note_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(mut note) = tables.notes.remove(old_id) {
            // A row already keyed new_id is the finished rename; keep it.
            if !tables.notes.contains_key(new_id) {
                note.id = new_id.to_string();
                tables.notes.insert(new_id.to_string(), note);
            }
        }
        Ok(())
    }

    fn rewrite_folder_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(mut folder) = tables.folders.remove(old_id) {
            if !tables.folders.contains_key(new_id) {
                folder.id = new_id.to_string();
                tables.folders.insert(new_id.to_string(), folder);
            }
        }
        for note in tables.notes.values_mut() {
            if note.folder_id == old_id {
                note.folder_id = new_id.to_string();
            }
        }
        Ok(())
    }
}
