//! Online-state aggregator.
//!
//! Combines reachability, authentication, and credential validity into one
//! observable predicate. Transitions drive processor ticks but never block
//! the coordinator: saves always land locally regardless of this state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventBus, SyncEvent};

#[derive(Debug, Clone, Copy)]
struct Flags {
    connected: bool,
    authenticated: bool,
    credential_valid: bool,
}

impl Flags {
    fn aggregate(self) -> bool {
        self.connected && self.authenticated && self.credential_valid
    }
}

/// `is_online = connected ∧ authenticated ∧ credential_valid`.
///
/// The host's reachability monitor and auth layer feed the individual bits;
/// an `OnlineStateChanged` event fires only when the aggregate flips.
pub struct OnlineState {
    flags: Mutex<Flags>,
    events: Arc<EventBus>,
}

impl OnlineState {
    /// Starts offline and unauthenticated; credentials are presumed valid
    /// until the remote says otherwise.
    pub fn new(events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            flags: Mutex::new(Flags {
                connected: false,
                authenticated: false,
                credential_valid: true,
            }),
            events,
        })
    }

    pub fn is_online(&self) -> bool {
        self.flags.lock().aggregate()
    }

    pub fn set_connected(&self, connected: bool) {
        self.update(|f| f.connected = connected);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.update(|f| f.authenticated = authenticated);
    }

    pub fn set_credential_valid(&self, valid: bool) {
        self.update(|f| f.credential_valid = valid);
    }

    fn update(&self, apply: impl FnOnce(&mut Flags)) {
        let flipped = {
            let mut flags = self.flags.lock();
            let before = flags.aggregate();
            apply(&mut flags);
            let after = flags.aggregate();
            (before != after).then_some(after)
        };
        if let Some(is_online) = flipped {
            tracing::debug!(is_online, "online state changed");
            self.events.emit(&SyncEvent::OnlineStateChanged { is_online });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_with_log() -> (Arc<OnlineState>, Arc<Mutex<Vec<bool>>>) {
        let events = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        events.subscribe(Arc::new(move |e| {
            if let SyncEvent::OnlineStateChanged { is_online } = e {
                log2.lock().push(*is_online);
            }
        }));
        (OnlineState::new(events), log)
    }

    #[test]
    fn aggregate_needs_all_three_bits() {
        let (state, _) = online_with_log();
        assert!(!state.is_online());
        state.set_connected(true);
        assert!(!state.is_online());
        state.set_authenticated(true);
        assert!(state.is_online());
        state.set_credential_valid(false);
        assert!(!state.is_online());
    }

    #[test]
    fn event_fires_only_on_aggregate_flip() {
        let (state, log) = online_with_log();
        state.set_connected(true);
        assert!(log.lock().is_empty(), "no flip yet");
        state.set_authenticated(true);
        assert_eq!(*log.lock(), vec![true]);
        state.set_connected(true);
        assert_eq!(log.lock().len(), 1, "idempotent set emits nothing");
        state.set_connected(false);
        assert_eq!(*log.lock(), vec![true, false]);
    }
}
