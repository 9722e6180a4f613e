//! Handle for talking to the lifecycle controller.
//!
//! `LifecycleHandle` is cheap to clone. State reads come from a `watch` channel and
//! never wait on the actor; connect requests go through the actor's queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::connector::{SessionClient, normalize_recipient};

use super::actor_types::{ConnectOutcome, ControllerCommand, LifecycleError};
use super::state::{ConnectionSnapshot, ConnectionState, PairingArtifact};

/// Handle for interacting with the lifecycle controller.
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: mpsc::Sender<ControllerCommand>,
    state_rx: watch::Receiver<ConnectionSnapshot>,
    client: Arc<dyn SessionClient>,
}

/// A sent message as acknowledged by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    /// Normalized recipient JID.
    pub to: String,
}

impl LifecycleHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<ControllerCommand>,
        state_rx: watch::Receiver<ConnectionSnapshot>,
        client: Arc<dyn SessionClient>,
    ) -> Self {
        Self {
            tx,
            state_rx,
            client,
        }
    }

    // ------------------------------------------------------------------------
    // Read Operations
    // ------------------------------------------------------------------------

    /// The latest published snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_rx.borrow().state
    }

    /// The pairing artifact, if pairing is pending.
    pub fn current_pairing_artifact(&self) -> Option<PairingArtifact> {
        self.state_rx.borrow().pairing_artifact().cloned()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state_rx.clone()
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Ask the controller to connect. A no-op while connected or attempting.
    pub async fn request_connect(&self) -> Result<ConnectOutcome, LifecycleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControllerCommand::Connect { reply: reply_tx })
            .await
            .map_err(|_| LifecycleError::ActorShutdown)?;

        reply_rx.await.map_err(|_| LifecycleError::ActorShutdown)
    }

    /// Send a text message through the session.
    ///
    /// Fails with [`LifecycleError::NotConnected`] without touching the session
    /// unless the state is `connected`.
    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<SentMessage, LifecycleError> {
        let state = self.current_state();
        if !state.is_connected() {
            return Err(LifecycleError::NotConnected(state));
        }

        let to = normalize_recipient(recipient)?;
        debug!(to = %to, "Sending text message");
        let message_id = self.client.send_text(&to, text).await?;
        Ok(SentMessage { message_id, to })
    }
}
