//! Id-mapping registry.
//!
//! Tracks temporary → server id mappings and drives the reference rewrite
//! that retires a temporary id everywhere at once: the entity's store row,
//! every queue row targeting it, and (via event) the UI. The rewrite steps
//! are individually idempotent so `recover_incomplete` can replay a mapping
//! that was interrupted between steps.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::queue::OperationQueue;
use crate::storage::traits::SyncStore;
use crate::temp_id;
use crate::types::{EntityKind, IdMapping};

pub struct IdMappingRegistry {
    store: Arc<dyn SyncStore>,
    queue: Arc<OperationQueue>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    prefix: String,
    cache: Mutex<HashMap<String, IdMapping>>,
}

impl IdMappingRegistry {
    pub fn new(
        store: Arc<dyn SyncStore>,
        queue: Arc<OperationQueue>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            events,
            clock,
            prefix: prefix.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rehydrate the cache from the store. Returns the loaded count.
    pub fn load(&self) -> Result<usize> {
        let rows = self.store.load_mappings()?;
        let mut cache = self.cache.lock();
        for mapping in rows {
            cache.insert(mapping.local_id.clone(), mapping);
        }
        Ok(cache.len())
    }

    /// Record that the server assigned `server_id` to `local_id`. The
    /// mapping starts incomplete; `mark_completed` flips it once every
    /// reference has been rewritten.
    pub fn register(
        &self,
        local_id: &str,
        server_id: &str,
        entity_kind: EntityKind,
    ) -> Result<()> {
        let mapping = IdMapping {
            local_id: local_id.to_string(),
            server_id: server_id.to_string(),
            entity_kind,
            created_at: self.clock.now(),
            completed: false,
        };
        self.store.put_mapping(&mapping)?;
        self.cache.lock().insert(local_id.to_string(), mapping);
        debug!(local = %local_id, server = %server_id, kind = ?entity_kind, "id mapping registered");
        Ok(())
    }

    /// Translate a possibly-temporary id to its server id. Ids without a
    /// mapping (including all non-temporary ids) pass through unchanged.
    pub fn resolve(&self, id: &str) -> String {
        if !temp_id::is_temporary(id, &self.prefix) {
            return id.to_string();
        }
        self.cache
            .lock()
            .get(id)
            .map(|m| m.server_id.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Rewrite every reference to `local_id`: the entity's primary key in
    /// the store, all queue rows, then a `NoteIdChanged` event for the UI.
    /// Any step failure propagates; callers may replay safely.
    pub fn update_all_references(&self, local_id: &str, server_id: &str) -> Result<()> {
        let entity_kind = self
            .cache
            .lock()
            .get(local_id)
            .map(|m| m.entity_kind)
            .unwrap_or(EntityKind::Note);

        match entity_kind {
            EntityKind::Note => self.store.rewrite_note_id(local_id, server_id)?,
            EntityKind::Folder => self.store.rewrite_folder_id(local_id, server_id)?,
        }
        self.queue.update_note_id(local_id, server_id)?;
        self.events.emit(&SyncEvent::NoteIdChanged {
            old_id: local_id.to_string(),
            new_id: server_id.to_string(),
        });
        Ok(())
    }

    /// Flip the mapping to completed and announce it. Completed mappings
    /// are eligible for `cleanup_completed`.
    pub fn mark_completed(&self, local_id: &str) -> Result<()> {
        let updated = {
            let mut cache = self.cache.lock();
            match cache.get_mut(local_id) {
                Some(mapping) => {
                    mapping.completed = true;
                    Some(mapping.clone())
                }
                None => None,
            }
        };
        let Some(mapping) = updated else {
            return Ok(());
        };
        self.store.put_mapping(&mapping)?;
        self.events.emit(&SyncEvent::IdMappingCompleted {
            local_id: mapping.local_id.clone(),
            server_id: mapping.server_id.clone(),
            entity_kind: mapping.entity_kind,
        });
        Ok(())
    }

    /// Garbage-collect completed mappings. Returns how many were removed.
    pub fn cleanup_completed(&self) -> Result<usize> {
        let removed = self.store.delete_completed_mappings()?;
        self.cache.lock().retain(|_, m| !m.completed);
        if removed > 0 {
            debug!(removed, "completed id mappings cleaned up");
        }
        Ok(removed)
    }

    /// Replay unfinished mappings after a restart. Mappings that fail to
    /// replay stay incomplete for the next attempt.
    pub fn recover_incomplete(&self) -> Result<usize> {
        let incomplete: Vec<IdMapping> = self
            .cache
            .lock()
            .values()
            .filter(|m| !m.completed)
            .cloned()
            .collect();

        let mut recovered = 0usize;
        for mapping in incomplete {
            match self.update_all_references(&mapping.local_id, &mapping.server_id) {
                Ok(()) => {
                    self.mark_completed(&mapping.local_id)?;
                    recovered += 1;
                }
                Err(e) => {
                    warn!(local = %mapping.local_id, error = %e, "id mapping recovery failed");
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "incomplete id mappings replayed");
        }
        Ok(recovered)
    }

    pub fn get(&self, local_id: &str) -> Option<IdMapping> {
        self.cache.lock().get(local_id).cloned()
    }
}
