//! Connection lifecycle for the WhatsApp session.
//!
//! # Architecture
//!
//! ```text
//!  SessionClient ──EventSink(epoch)──▶ ┌──────────────────┐
//!                                      │ ControllerActor  │  owns state, epoch,
//!  LifecycleHandle ──ControllerCommand─▶│  (one per proc)  │  reconnect timer
//!        ▲                             └───────┬──────────┘
//!        │ watch<ConnectionSnapshot>           │ notify (non-blocking)
//!        └─────────────────────────────────────┤
//!                                              ▼
//!                                      MessageNotifier
//! ```
//!
//! - **ControllerActor** is the only writer of the connection state and the
//!   pairing artifact. It applies events in order and decides on reconnects.
//! - **LifecycleHandle** is what the API uses: lock-free state reads, connect
//!   requests, and sends (which go straight to the session client).

mod actor;
mod actor_types;
mod handle;
mod reconnect;
mod state;

pub use actor::LifecycleController;
pub use actor_types::{ConnectOutcome, ControllerOptions, LifecycleError};
pub use handle::{LifecycleHandle, SentMessage};
pub use reconnect::{ReconnectPolicy, RetryCause};
pub use state::{ConnectionSnapshot, ConnectionState, PairingArtifact, transition};
