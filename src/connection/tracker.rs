//! Connection state tracker implementation.

use crate::handlers::{guarded, ConnectionListener};
use crate::types::{ConnectionState, ListenerId};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;

struct TrackerState {
    current: ConnectionState,
    listeners: Vec<(ListenerId, ConnectionListener)>,
    next_listener: u64,
}

/// Owns the process-wide [`ConnectionState`].
///
/// Registration and transitions deliver their notifications while holding
/// `notify`, so a listener registered concurrently with a transition sees
/// either the old state followed by the new one, or only the new one, and
/// every listener observes states in transition order. `notify` is
/// reentrant so a listener may register, remove or read from its callback.
pub struct ConnectionTracker {
    notify: ReentrantMutex<()>,
    state: Mutex<TrackerState>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            notify: ReentrantMutex::new(()),
            state: Mutex::new(TrackerState {
                current: ConnectionState::Disconnected,
                listeners: Vec::new(),
                next_listener: 1,
            }),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.state.lock().current
    }

    /// Register a listener and invoke it once with the current state.
    pub fn add_listener(&self, listener: ConnectionListener) -> ListenerId {
        let _ordered = self.notify.lock();
        let (id, current) = {
            let mut state = self.state.lock();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.current)
        };

        notify(id, &listener, current);
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Apply a raw system-channel status.
    ///
    /// Returns the new state if it differs from the current one; listeners
    /// are notified only in that case.
    pub fn apply_raw(&self, raw: &str) -> Option<ConnectionState> {
        self.transition(ConnectionState::from_raw(raw))
    }

    /// Move to `next`, notifying listeners if it is a change.
    pub fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let _ordered = self.notify.lock();
        let listeners = {
            let mut state = self.state.lock();
            if state.current == next {
                return None;
            }
            tracing::info!(from = %state.current, to = %next, "connection state changed");
            state.current = next;
            state.listeners.clone()
        };

        for (id, listener) in &listeners {
            notify(*id, listener, next);
        }
        Some(next)
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(id: ListenerId, listener: &ConnectionListener, state: ConnectionState) {
    if let Err(panic) = guarded(|| listener(state)) {
        tracing::error!(listener = id.0, %state, "connection listener failed: {}", panic);
    }
}
