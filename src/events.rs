//! Events emitted by the sync core.
//!
//! The processor publishes, the coordinator and UI subscribe. This is what
//! breaks the coordinator ↔ processor cycle: the processor never holds a
//! coordinator reference, it only emits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::queue::op::OperationKind;
use crate::types::EntityKind;

/// Everything observable from the outside.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An operation executed against the remote API and its row was removed.
    OperationCompleted {
        op_id: String,
        target_id: String,
        kind: OperationKind,
    },
    /// The remote rejected credentials; the operation is parked as
    /// `AuthFailed` and the drain run stopped.
    OperationAuthFailed { op_id: String, target_id: String },
    /// A temporary id was replaced by a server-assigned one.
    NoteIdChanged { old_id: String, new_id: String },
    /// All references to a temporary id have been rewritten.
    IdMappingCompleted {
        local_id: String,
        server_id: String,
        entity_kind: EntityKind,
    },
    /// The aggregate online predicate flipped.
    OnlineStateChanged { is_online: bool },
    /// A `process_queue`/`process_retries` run finished.
    QueueDrained { processed: usize, failed: usize },
}

type Subscriber = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out bus.
///
/// Subscribers run on the emitting thread and must not call back into the
/// lock of the component that emitted (the emitters all publish outside
/// their own critical sections).
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, f: Subscriber) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, f));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id.0);
    }

    pub fn emit(&self, event: &SyncEvent) {
        // Snapshot so subscribers can (un)subscribe from inside a callback.
        let subs: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for f in subs {
            f(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(Arc::new(move |_| *seen.lock() += 1));
        }

        bus.emit(&SyncEvent::OnlineStateChanged { is_online: true });
        assert_eq!(*seen.lock(), 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));
        let seen2 = Arc::clone(&seen);
        let id = bus.subscribe(Arc::new(move |_| *seen2.lock() += 1));

        bus.emit(&SyncEvent::QueueDrained {
            processed: 0,
            failed: 0,
        });
        bus.unsubscribe(id);
        bus.emit(&SyncEvent::QueueDrained {
            processed: 0,
            failed: 0,
        });

        assert_eq!(*seen.lock(), 1);
    }
}
