//! Offline operation queue and sync coordination core for a local-first
//! notes app.
//!
//! User edits mutate the local store immediately; network work flows
//! through a durable, deduplicating operation queue and proceeds whenever
//! connectivity and credentials allow. Guards keep the incremental-sync
//! path from overwriting unsent local changes, and an id-mapping registry
//! reconciles offline-generated temporary ids with server-assigned ones
//! across the store, the queue, and the editor.
//!
//! The host app supplies the ports: a [`storage::traits::SyncStore`] (a
//! SQLite implementation ships behind the `sqlite` feature), a
//! [`remote::RemoteApi`] transport, and a [`clock::Clock`]. The
//! [`engine::SyncEngine`] composition root wires everything together.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod online;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod sync_tag;
pub mod temp_id;
pub mod types;

pub use config::SyncConfig;
pub use coordinator::{ConflictResolution, NoteCoordinator};
pub use engine::{RecoveryReport, SyncEngine};
pub use error::{Result, StoreError, SyncError};
pub use events::{EventBus, SyncEvent};
pub use guard::{SkipReason, SyncGuard};
pub use processor::{DrainOutcome, OperationProcessor};
pub use queue::op::{ErrorKind, Operation, OperationKind, OperationPayload, OperationStatus};
pub use queue::{OperationQueue, QueueStatistics};
pub use registry::IdMappingRegistry;
pub use remote::{ApiResponse, RemoteApi, RemoteError, SyncPage};
pub use sync_tag::SyncTagManager;
pub use types::{EntityKind, Folder, IdMapping, Note, SyncStatus, Timestamp};
