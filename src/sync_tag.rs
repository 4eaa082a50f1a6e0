//! Sync-tag state manager.
//!
//! The server cursor may only advance to a value the server returned, and
//! only once the queue carries no pending uploads. While uploads are in
//! flight the fresh tag is staged in memory; `confirm_if_needed` persists it
//! after the drain. Only `stage` and `confirm_if_needed` touch the persisted
//! tag.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::traits::SyncStore;
use crate::types::{SyncStatus, Timestamp};

#[derive(Debug, Clone)]
struct StagedTag {
    tag: String,
    staged_at: Timestamp,
}

pub struct SyncTagManager {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    staged: Mutex<Option<StagedTag>>,
}

impl SyncTagManager {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            staged: Mutex::new(None),
        }
    }

    /// The persisted cursor, if any sync has completed yet.
    pub fn current(&self) -> Result<Option<String>> {
        Ok(self.store.get_sync_status()?.sync_tag)
    }

    /// Accept a tag the server just returned. With no uploads pending it is
    /// persisted immediately; otherwise it waits in memory for the queue to
    /// drain. A newer stage replaces an older one.
    pub fn stage(&self, tag: impl Into<String>, has_pending_uploads: bool) -> Result<()> {
        let tag = tag.into();
        if !has_pending_uploads {
            self.persist(&tag)?;
            *self.staged.lock() = None;
            return Ok(());
        }
        let staged_at = self.clock.now();
        debug!(%tag, "sync tag staged until uploads drain");
        *self.staged.lock() = Some(StagedTag { tag, staged_at });
        Ok(())
    }

    /// Persist the staged tag, if one is waiting. Returns whether a
    /// confirmation happened. Callers gate this on the queue carrying no
    /// pending uploads.
    pub fn confirm_if_needed(&self) -> Result<bool> {
        let staged = self.staged.lock().take();
        let Some(staged) = staged else {
            return Ok(false);
        };
        self.persist(&staged.tag)?;
        debug!(tag = %staged.tag, staged_at = %staged.staged_at, "staged sync tag confirmed");
        Ok(true)
    }

    /// Drop the staged tag without persisting (sync-error rollback).
    pub fn clear_pending(&self) {
        if self.staged.lock().take().is_some() {
            debug!("staged sync tag discarded");
        }
    }

    pub fn has_staged(&self) -> bool {
        self.staged.lock().is_some()
    }

    fn persist(&self, tag: &str) -> Result<()> {
        let status = SyncStatus {
            last_sync_time: Some(self.clock.now()),
            sync_tag: Some(tag.to_string()),
        };
        self.store.put_sync_status(&status)?;
        info!(%tag, "sync tag advanced");
        Ok(())
    }
}
