//! Connection lifecycle state machine.
//!
//! ```text
//!  Idle ──connect()──▶ Connecting ──open──▶ Connected
//!   ▲                    │   ▲                 │
//!   │               close│   │timer       close│/error
//!   │                    ▼   │                 ▼
//!   │               Disconnected ──schedule──▶ Reconnecting
//!   │                    │                     │
//!   │                    └────────┬────────────┘
//!   │                   max attempts / abort
//!   │                             ▼
//!   └──────teardown()─────────  Failed
//! ```
//!
//! `teardown()` is accepted from every state and always lands in `Idle`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::domain::errors::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Terminal for the current retry cycle. Only an explicit `connect()`
    /// or `teardown()` leaves it.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// A transport is either being opened or is already live.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Idle {
            return true;
        }

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Reconnecting)
                | (Disconnected, Connecting)
                | (Disconnected, Failed)
                | (Reconnecting, Connecting)
                | (Reconnecting, Failed)
                | (Connecting, Failed)
                | (Connected, Failed)
                | (Failed, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Published on every accepted transition.
#[derive(Clone, Debug)]
pub struct StateChangeEvent {
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
    pub timestamp: Instant,
    pub trigger_reason: String,
}

/// Owns the current `ConnectionState` and rejects transitions that are not
/// part of the lifecycle.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    transitions: u64,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn total_transitions(&self) -> u64 {
        self.transitions
    }

    pub fn transition(
        &mut self,
        next: ConnectionState,
        reason: &str,
    ) -> Result<StateChangeEvent, ConnectionError> {
        if !self.state.can_transition_to(next) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let event = StateChangeEvent {
            from_state: self.state,
            to_state: next,
            timestamp: Instant::now(),
            trigger_reason: reason.to_string(),
        };
        self.state = next;
        self.transitions += 1;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let machine = ConnectionStateMachine::new();
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert_eq!(machine.total_transitions(), 0);
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut machine = ConnectionStateMachine::new();
        machine.transition(ConnectionState::Connecting, "connect").unwrap();
        machine.transition(ConnectionState::Connected, "open").unwrap();
        machine.transition(ConnectionState::Disconnected, "close").unwrap();
        machine.transition(ConnectionState::Reconnecting, "schedule").unwrap();
        let event = machine.transition(ConnectionState::Connecting, "timer").unwrap();

        assert_eq!(event.from_state, ConnectionState::Reconnecting);
        assert_eq!(event.to_state, ConnectionState::Connecting);
        assert_eq!(event.trigger_reason, "timer");
        assert_eq!(machine.total_transitions(), 5);
    }

    #[test]
    fn test_teardown_accepted_from_every_state() {
        let states = [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ];
        for state in states {
            assert!(state.can_transition_to(ConnectionState::Idle), "{state} -> Idle");
        }
    }

    #[test]
    fn test_rejects_skipping_connecting() {
        let mut machine = ConnectionStateMachine::new();
        let err = machine
            .transition(ConnectionState::Connected, "open")
            .unwrap_err();

        assert_eq!(
            err,
            ConnectionError::InvalidTransition {
                from: ConnectionState::Idle,
                to: ConnectionState::Connected,
            }
        );
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_failed_is_left_only_by_connect_or_teardown() {
        assert!(ConnectionState::Failed.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Failed.can_transition_to(ConnectionState::Reconnecting));
        assert!(!ConnectionState::Failed.can_transition_to(ConnectionState::Connected));
    }

    #[test]
    fn test_in_flight_states() {
        assert!(ConnectionState::Connecting.is_in_flight());
        assert!(ConnectionState::Connected.is_in_flight());
        assert!(!ConnectionState::Reconnecting.is_in_flight());
        assert!(!ConnectionState::Idle.is_in_flight());
    }
}
