//! Connection state machine
//!
//! The state only moves on transport events: `Connected` flips it to
//! [`ConnectionState::Connected`], `Disconnected` flips it back. Publish and
//! subscribe calls read it but never write it.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Transport events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport reported an accepted connection
    Connected,
    /// Transport reported the connection closed or lost
    Disconnected,
}

/// Determine next state after a connection event (pure function)
pub fn next_state(_current: ConnectionState, event: ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::Connected => ConnectionState::Connected,
        ConnectionEvent::Disconnected => ConnectionState::Disconnected,
    }
}

/// Check if connection state allows publishing (pure function)
pub fn can_publish(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Check if connection state allows subscribe and unsubscribe (pure function)
pub fn can_subscribe(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Log connection state transition
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Disconnected, ConnectionState::Connected) => {
            info!("MQTT connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("MQTT connection lost");
        }
        (ConnectionState::Connected, ConnectionState::Connected) => {
            info!("MQTT connection re-confirmed while already connected");
        }
        (ConnectionState::Disconnected, ConnectionState::Disconnected) => {
            info!("MQTT disconnect reported while already disconnected");
        }
    }
}

/// Thread-safe holder for the current [`ConnectionState`]
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connected: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Apply an event and return `(previous, current)`
    pub fn apply(&self, event: ConnectionEvent) -> (ConnectionState, ConnectionState) {
        let target = next_state(self.state(), event);
        let was_connected = self
            .connected
            .swap(target == ConnectionState::Connected, Ordering::AcqRel);
        let previous = if was_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        (previous, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
        assert!(!tracker.is_connected());
    }

    #[test]
    fn test_transitions() {
        let tracker = ConnectionTracker::new();

        let (from, to) = tracker.apply(ConnectionEvent::Connected);
        assert_eq!(from, ConnectionState::Disconnected);
        assert_eq!(to, ConnectionState::Connected);
        assert!(tracker.is_connected());

        let (from, to) = tracker.apply(ConnectionEvent::Disconnected);
        assert_eq!(from, ConnectionState::Connected);
        assert_eq!(to, ConnectionState::Disconnected);
        assert!(!tracker.is_connected());
    }

    #[test]
    fn test_repeated_events_are_idempotent() {
        let tracker = ConnectionTracker::new();
        tracker.apply(ConnectionEvent::Connected);
        let (from, to) = tracker.apply(ConnectionEvent::Connected);
        assert_eq!(from, ConnectionState::Connected);
        assert_eq!(to, ConnectionState::Connected);
    }

    #[test]
    fn test_next_state_ignores_current() {
        for current in [ConnectionState::Connected, ConnectionState::Disconnected] {
            assert_eq!(
                next_state(current, ConnectionEvent::Connected),
                ConnectionState::Connected
            );
            assert_eq!(
                next_state(current, ConnectionEvent::Disconnected),
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn test_gating() {
        assert!(can_publish(ConnectionState::Connected));
        assert!(!can_publish(ConnectionState::Disconnected));
        assert!(can_subscribe(ConnectionState::Connected));
        assert!(!can_subscribe(ConnectionState::Disconnected));
    }
}
