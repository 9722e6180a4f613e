//! Session protocol types for communication between wabridge and a WhatsApp session sidecar.
//!
//! The sidecar is the process that embeds the actual WhatsApp client library. It owns
//! credential storage, the websocket to WhatsApp, and QR pairing. wabridge only drives
//! it and reacts to what it reports.
//!
//! # Protocol Overview
//!
//! The protocol is bidirectional with JSON Lines (newline-delimited JSON) over stdio:
//!
//! - **Commands** (wabridge → sidecar): Instructions such as connect or send a text
//! - **Events** (sidecar → wabridge): Lifecycle notifications, inbound messages, command results
//!
//! # Example: Minimal Sidecar
//!
//! ```ignore
//! use wabridge_protocol::{ClientCommand, ClientEvent};
//!
//! // Read commands from stdin
//! let line = read_line_from_stdin();
//! let command: ClientCommand = serde_json::from_str(&line)?;
//!
//! // Report a pairing code on stdout
//! let event = ClientEvent::PairingCode {
//!     code: "2@AbC...".to_string(),
//!     expires_in: Some(60),
//! };
//! println!("{}", serde_json::to_string(&event)?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (wabridge → sidecar)
// ============================================================================

/// Commands sent from wabridge to the session sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open (or re-open) the WhatsApp connection using the persisted credentials.
    Connect,

    /// Send a text message.
    SendText {
        request_id: String,
        /// Recipient JID (e.g. `5511999999999@s.whatsapp.net`).
        to: String,
        text: String,
    },

    /// Health check / ping.
    Ping { request_id: String },

    /// Request graceful shutdown.
    Shutdown,
}

// ============================================================================
// Events (sidecar → wabridge)
// ============================================================================

/// Events sent from the session sidecar to wabridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Sidecar started and is ready to receive commands.
    Ready {
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        library: Option<String>,
    },

    /// A new pairing code was issued (rendered as a QR code for scanning).
    PairingCode {
        code: String,
        /// Seconds until the code rotates.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_in: Option<u32>,
    },

    /// The connection to WhatsApp is open.
    ConnectionOpen {
        /// JID of the bound account, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },

    /// The connection to WhatsApp closed.
    ConnectionClosed {
        reason: CloseReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A message was observed on the account (received or sent from another device).
    Message(Box<MessageData>),

    /// Command completed successfully.
    CommandOk {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Command failed.
    CommandError {
        request_id: String,
        code: String,
        message: String,
    },

    /// Response to Ping command.
    Pong {
        request_id: String,
        uptime_seconds: u64,
    },

    /// Sidecar-level error (not tied to a specific command).
    Error { code: String, message: String },
}

/// Why a connection closed.
///
/// Only [`CloseReason::LoggedOut`] means the session is gone for good; every other
/// reason is transient from wabridge's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The account was logged out remotely (device unlinked). Credentials are invalid.
    LoggedOut,
    /// Network connection lost.
    ConnectionLost,
    /// Connection closed by the server.
    ConnectionClosed,
    /// Keepalive or request timed out.
    TimedOut,
    /// The server asked the client to restart (normal after pairing).
    RestartRequired,
    /// Another client took over the session.
    Replaced,
    /// Anything the sidecar could not classify.
    #[serde(other)]
    Other,
}

impl CloseReason {
    /// Whether this closure ends the session permanently.
    pub fn is_terminal(self) -> bool {
        matches!(self, CloseReason::LoggedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::LoggedOut => "logged_out",
            CloseReason::ConnectionLost => "connection_lost",
            CloseReason::ConnectionClosed => "connection_closed",
            CloseReason::TimedOut => "timed_out",
            CloseReason::RestartRequired => "restart_required",
            CloseReason::Replaced => "replaced",
            CloseReason::Other => "other",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data for a message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub message_id: String,
    /// Chat JID the message belongs to.
    pub chat_id: String,
    pub sender: Sender,
    /// True when the message was sent by the bound account itself.
    #[serde(default)]
    pub from_me: bool,
    pub content: MessageContent,
    /// Timestamp when the message was sent (from the platform).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Library-specific payload, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

/// Sender information for messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    /// Sender JID.
    pub id: String,
    /// Push name chosen by the sender, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Content of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text message.
    Text { text: String },

    /// Media message (image, video, audio, document, sticker).
    Media {
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },

    /// Location message.
    Location { latitude: f64, longitude: f64 },

    /// Contact card.
    Contact { name: String, phone: String },

    /// Unknown/unsupported content type.
    Unknown {
        #[serde(default)]
        raw: serde_json::Value,
    },
}

impl MessageContent {
    /// Extract text content if this is a text message or a captioned media message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            MessageContent::Media { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes for CommandError and Error events.
pub mod error_codes {
    /// Recipient is not a WhatsApp user.
    pub const RECIPIENT_NOT_FOUND: &str = "recipient_not_found";
    /// Rate limited by WhatsApp.
    pub const RATE_LIMITED: &str = "rate_limited";
    /// Library/platform error.
    pub const PLATFORM_ERROR: &str = "platform_error";
    /// Invalid command from wabridge.
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// Sidecar is not connected to WhatsApp.
    pub const NOT_CONNECTED: &str = "not_connected";
}
