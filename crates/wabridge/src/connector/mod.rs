//! Connector to the WhatsApp session.
//!
//! wabridge never speaks the WhatsApp protocol itself. A [`SessionClient`] owns the
//! actual session (credentials, websocket, pairing) and reports what happens to it
//! as [`LifecycleEvent`]s. The lifecycle controller decides what to do about them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  wabridge                    │
//! │                                              │
//! │   LifecycleController ◄── EventSink(epoch) ──┼──┐
//! │          │                                   │  │
//! │          ▼ connect / send_text               │  │
//! │   ┌──────────────────────────────┐           │  │
//! │   │  dyn SessionClient           │───────────┼──┘
//! │   └──────────────┬───────────────┘           │
//! └──────────────────┼───────────────────────────┘
//!                    │ JSON Lines over stdio
//!          ┌─────────┴─────────┐
//!          │  session sidecar  │
//!          └───────────────────┘
//! ```

pub mod subprocess;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use subprocess::{SubprocessClient, SubprocessConfig};
pub use wabridge_protocol::{CloseReason, MessageContent, MessageData, Sender};

/// An inbound message as reported by the session.
pub type InboundMessage = MessageData;

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Events a session client reports to the lifecycle controller.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A pairing code is available for scanning.
    PairingIssued { code: String },
    /// The connection is open and the account is usable.
    Opened { account: Option<String> },
    /// The connection closed.
    Closed { reason: CloseReason },
    /// A message was observed on the account.
    MessageReceived(Box<InboundMessage>),
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::PairingIssued { .. } => "pairing_issued",
            LifecycleEvent::Opened { .. } => "opened",
            LifecycleEvent::Closed { .. } => "closed",
            LifecycleEvent::MessageReceived(_) => "message_received",
        }
    }
}

/// A lifecycle event tagged with the connection attempt it belongs to.
#[derive(Debug)]
pub struct EventEnvelope {
    pub epoch: u64,
    pub event: LifecycleEvent,
}

/// Where a session client delivers events for one connection attempt.
///
/// Each call to [`SessionClient::connect`] receives a sink for a new epoch.
/// Events pushed through an older sink are discarded by the controller.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { epoch, tx }
    }

    /// Create a sink and the receiving end of its channel.
    pub fn channel(epoch: u64, capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(epoch, tx), rx)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver an event. Returns `false` if the controller is gone.
    pub async fn emit(&self, event: LifecycleEvent) -> bool {
        self.tx
            .send(EventEnvelope {
                epoch: self.epoch,
                event,
            })
            .await
            .is_ok()
    }
}

// ============================================================================
// Session Client
// ============================================================================

/// A WhatsApp session that can be connected and used to send messages.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Start a connection attempt, reporting its lifecycle through `sink`.
    ///
    /// Returns an error only if the attempt could not be started at all.
    async fn connect(&self, sink: EventSink) -> Result<(), ConnectorError>;

    /// Send a text message to a normalized recipient JID. Returns the message id.
    async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ConnectorError>;

    /// Stop the session. Best effort.
    async fn shutdown(&self) {}
}

/// Errors from the session client.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to start session client: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("session client is not running")]
    NotRunning,

    #[error("session client channel closed")]
    ChannelClosed,

    #[error("session client did not answer within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
}

// ============================================================================
// Recipients
// ============================================================================

/// JID server for individual accounts.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Normalize a recipient into a JID.
///
/// Anything containing `@` is taken as a JID already. Otherwise the input must be
/// a phone number; `+`, spaces, dashes, dots and parentheses are stripped.
pub fn normalize_recipient(input: &str) -> Result<String, ConnectorError> {
    let trimmed = input.trim();
    if trimmed.contains('@') {
        return Ok(trimmed.to_string());
    }

    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConnectorError::InvalidRecipient(input.to_string()));
    }

    Ok(format!("{digits}@{USER_SERVER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_number() {
        assert_eq!(
            normalize_recipient("5511999999999").unwrap(),
            "5511999999999@s.whatsapp.net"
        );
    }

    #[test]
    fn test_normalize_formatted_number() {
        assert_eq!(
            normalize_recipient(" +55 (11) 99999-9999 ").unwrap(),
            "5511999999999@s.whatsapp.net"
        );
    }

    #[test]
    fn test_normalize_keeps_jids() {
        assert_eq!(
            normalize_recipient("120363025246125486@g.us").unwrap(),
            "120363025246125486@g.us"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_recipient(""),
            Err(ConnectorError::InvalidRecipient(_))
        ));
        assert!(matches!(
            normalize_recipient("call me maybe"),
            Err(ConnectorError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_sink_tags_events_with_epoch() {
        let (sink, mut rx) = EventSink::channel(7, 4);
        assert!(
            sink.emit(LifecycleEvent::Opened { account: None })
                .await
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.epoch, 7);
        assert_eq!(envelope.event.kind(), "opened");

        drop(rx);
        assert!(
            !sink
                .emit(LifecycleEvent::Closed {
                    reason: CloseReason::ConnectionLost
                })
                .await
        );
    }
}
