//! Controller actor types and protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::ReconnectConfig;
use crate::connector::ConnectorError;

use super::state::ConnectionState;

/// Capacity of the command channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Capacity of the lifecycle event channel shared by all sinks.
pub const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Controller Command
// ============================================================================

/// Commands processed by the controller actor.
pub(crate) enum ControllerCommand {
    /// Explicit connect request from the API or at startup.
    Connect {
        reply: oneshot::Sender<ConnectOutcome>,
    },
    /// The session client finished starting attempt `epoch`.
    ConnectFinished {
        epoch: u64,
        result: Result<(), ConnectorError>,
    },
    /// A reconnect timer fired.
    ReconnectDue { generation: u64 },
}

/// Result of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// A new connection attempt was started.
    Started,
    /// Already connected; nothing was done.
    AlreadyConnected,
    /// An attempt is already running; nothing was done.
    InProgress,
}

// ============================================================================
// Configuration
// ============================================================================

/// Options for spawning the controller.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Print pairing codes to the terminal as a QR code.
    pub print_qr: bool,
    pub reconnect: ReconnectConfig,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned through a [`LifecycleHandle`](super::LifecycleHandle).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation needs a connected session.
    #[error("WhatsApp is not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// The controller actor is gone.
    #[error("lifecycle controller has shut down")]
    ActorShutdown,

    /// The session client rejected or failed the operation.
    #[error(transparent)]
    Send(#[from] ConnectorError),
}
