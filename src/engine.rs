//! Composition root.
//!
//! Constructs every component with shared ports, wires the processor's
//! id-mapping callback back to the coordinator, and owns the background
//! retry driver. Hosts build one `SyncEngine` per account/database; tests
//! build them with in-memory ports.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::coordinator::{ActiveEditing, NoteCoordinator};
use crate::error::{Result, SyncError};
use crate::events::EventBus;
use crate::guard::SyncGuard;
use crate::online::OnlineState;
use crate::processor::OperationProcessor;
use crate::queue::OperationQueue;
use crate::registry::IdMappingRegistry;
use crate::remote::RemoteApi;
use crate::storage::traits::SyncStore;
use crate::sync_tag::SyncTagManager;

/// What `recover` found at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub operations_loaded: usize,
    pub mappings_loaded: usize,
    pub mappings_replayed: usize,
}

pub struct SyncEngine {
    config: Arc<SyncConfig>,
    events: Arc<EventBus>,
    online: Arc<OnlineState>,
    queue: Arc<OperationQueue>,
    registry: Arc<IdMappingRegistry>,
    sync_tag: Arc<SyncTagManager>,
    guard: Arc<SyncGuard>,
    coordinator: Arc<NoteCoordinator>,
    processor: Arc<OperationProcessor>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let events = EventBus::new();
        let online = OnlineState::new(events.clone());
        let queue = Arc::new(OperationQueue::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let registry = Arc::new(IdMappingRegistry::new(
            store.clone(),
            queue.clone(),
            events.clone(),
            clock.clone(),
            config.temporary_id_prefix.clone(),
        ));
        let sync_tag = Arc::new(SyncTagManager::new(store.clone(), clock.clone()));
        let active = ActiveEditing::default();
        let guard = Arc::new(SyncGuard::new(
            queue.clone(),
            active.clone(),
            config.temporary_id_prefix.clone(),
        ));
        let processor = Arc::new(OperationProcessor::new(
            store.clone(),
            remote,
            queue.clone(),
            registry.clone(),
            sync_tag.clone(),
            events.clone(),
            online.clone(),
            config.clone(),
        ));
        let coordinator = Arc::new(NoteCoordinator::new(
            store,
            queue.clone(),
            registry.clone(),
            guard.clone(),
            processor.clone(),
            online.clone(),
            clock,
            config.clone(),
            active,
        ));

        // The processor reports create successes through a callback rather
        // than holding the coordinator, keeping the dependency graph acyclic.
        let weak = Arc::downgrade(&coordinator);
        processor.set_id_mapping_handler(Arc::new(move |local_id, server_id, _kind| {
            if let Some(coordinator) = weak.upgrade() {
                if let Err(e) = coordinator.handle_note_create_success(local_id, server_id) {
                    warn!(local = %local_id, server = %server_id, error = %e,
                        "id-mapping completion failed; will replay on recovery");
                }
            }
        }));

        Arc::new(Self {
            config,
            events,
            online,
            queue,
            registry,
            sync_tag,
            guard,
            coordinator,
            processor,
        })
    }

    /// Startup path: rehydrate the queue and registry, requeue anything
    /// caught mid-flight, and replay unfinished id mappings.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let operations_loaded = self.queue.load()?;
        let mappings_loaded = self.registry.load()?;
        let mappings_replayed = self.registry.recover_incomplete()?;
        Ok(RecoveryReport {
            operations_loaded,
            mappings_loaded,
            mappings_replayed,
        })
    }

    /// Background loop that drains due retries while online. Abort the
    /// returned handle on shutdown.
    pub fn spawn_retry_driver(&self) -> tokio::task::JoinHandle<()> {
        let processor = self.processor.clone();
        let online = self.online.clone();
        let period = self.config.retry_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !online.is_online() {
                    continue;
                }
                match processor.process_retries().await {
                    Ok(outcome) if outcome.processed + outcome.failed > 0 => {
                        debug!(?outcome, "retry drain finished");
                    }
                    Ok(_) => {}
                    // A foreground drain is running; this tick yields.
                    Err(SyncError::AlreadySyncing) => {}
                    Err(e) => warn!(error = %e, "retry drain failed"),
                }
            }
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn online(&self) -> &Arc<OnlineState> {
        &self.online
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<IdMappingRegistry> {
        &self.registry
    }

    pub fn sync_tag(&self) -> &Arc<SyncTagManager> {
        &self.sync_tag
    }

    pub fn guard(&self) -> &Arc<SyncGuard> {
        &self.guard
    }

    pub fn coordinator(&self) -> &Arc<NoteCoordinator> {
        &self.coordinator
    }

    pub fn processor(&self) -> &Arc<OperationProcessor> {
        &self.processor
    }
}
