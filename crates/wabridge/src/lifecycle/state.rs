//! Connection state and the transitions between states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::LifecycleEvent;

/// Connection state of the WhatsApp session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    AwaitingPairing,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::AwaitingPairing => "awaiting_pairing",
            ConnectionState::Connected => "connected",
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recent pairing code issued by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingArtifact {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

/// Point-in-time view of the connection, published by the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing: Option<PairingArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            pairing: None,
            account: None,
            updated_at: Utc::now(),
        }
    }
}

impl ConnectionSnapshot {
    /// The pairing artifact, only while pairing is actually pending.
    pub fn pairing_artifact(&self) -> Option<&PairingArtifact> {
        match self.state {
            ConnectionState::AwaitingPairing => self.pairing.as_ref(),
            _ => None,
        }
    }
}

/// Compute the state that follows `current` when `event` is observed.
///
/// A pairing code arriving while already connected is ignored.
pub fn transition(current: ConnectionState, event: &LifecycleEvent) -> ConnectionState {
    match event {
        LifecycleEvent::PairingIssued { .. } => match current {
            ConnectionState::Connected => ConnectionState::Connected,
            _ => ConnectionState::AwaitingPairing,
        },
        LifecycleEvent::Opened { .. } => ConnectionState::Connected,
        LifecycleEvent::Closed { .. } => ConnectionState::Disconnected,
        LifecycleEvent::MessageReceived(_) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::CloseReason;

    fn pairing() -> LifecycleEvent {
        LifecycleEvent::PairingIssued {
            code: "ABC123".to_string(),
        }
    }

    fn opened() -> LifecycleEvent {
        LifecycleEvent::Opened { account: None }
    }

    fn closed(reason: CloseReason) -> LifecycleEvent {
        LifecycleEvent::Closed { reason }
    }

    #[test]
    fn test_pairing_moves_to_awaiting_pairing() {
        assert_eq!(
            transition(ConnectionState::Disconnected, &pairing()),
            ConnectionState::AwaitingPairing
        );
        // Rotated code keeps us there
        assert_eq!(
            transition(ConnectionState::AwaitingPairing, &pairing()),
            ConnectionState::AwaitingPairing
        );
    }

    #[test]
    fn test_pairing_ignored_while_connected() {
        assert_eq!(
            transition(ConnectionState::Connected, &pairing()),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_open_connects_from_any_state() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::AwaitingPairing,
            ConnectionState::Connected,
        ] {
            assert_eq!(transition(state, &opened()), ConnectionState::Connected);
        }
    }

    #[test]
    fn test_close_disconnects_for_every_reason() {
        for reason in [CloseReason::LoggedOut, CloseReason::ConnectionLost, CloseReason::Other] {
            assert_eq!(
                transition(ConnectionState::Connected, &closed(reason)),
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn test_pairing_artifact_hidden_outside_pairing() {
        let artifact = PairingArtifact {
            code: "ABC123".to_string(),
            issued_at: Utc::now(),
        };
        let mut snapshot = ConnectionSnapshot {
            state: ConnectionState::AwaitingPairing,
            pairing: Some(artifact.clone()),
            ..Default::default()
        };
        assert_eq!(snapshot.pairing_artifact(), Some(&artifact));

        snapshot.state = ConnectionState::Connected;
        assert_eq!(snapshot.pairing_artifact(), None);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::AwaitingPairing).unwrap();
        assert_eq!(json, r#""awaiting_pairing""#);
    }
}
