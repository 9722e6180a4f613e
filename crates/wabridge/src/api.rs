//! Request and response bodies of the HTTP API.
//!
//! Shared by the handlers and by [`crate::client::BridgeClient`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{ConnectOutcome, ConnectionState};

// ============================================================================
// Status
// ============================================================================

/// GET /
#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub instance: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
}

/// GET /instance/status, /instance, /instance/{name}
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceStatusResponse {
    pub error: bool,
    pub instance: String,
    pub state: ConnectionState,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// GET /instance/qr
///
/// When connected only `error` and `connected` are present.
#[derive(Debug, Serialize, Deserialize)]
pub struct QrResponse {
    pub error: bool,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
    /// PNG rendering as a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    /// Raw pairing code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl QrResponse {
    pub fn connected() -> Self {
        Self {
            error: false,
            connected: true,
            state: None,
            qr: None,
            code: None,
            issued_at: None,
        }
    }
}

// ============================================================================
// Connect
// ============================================================================

/// POST /instance/connect, /instance/create
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub error: bool,
    pub outcome: ConnectOutcome,
    pub state: ConnectionState,
}

// ============================================================================
// Messages
// ============================================================================

/// POST /message/text, /sendText/{instance}, /messages-api
///
/// Each field accepts several names, but a body may use only one of them per
/// field; `{"number": .., "to": ..}` is rejected as a duplicate field.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendTextRequest {
    /// Phone number or JID.
    #[serde(alias = "phone", alias = "to")]
    pub number: String,
    #[serde(alias = "body", alias = "message")]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendTextResponse {
    pub error: bool,
    pub message_id: String,
    pub to: String,
}

/// GET /message/media/{id}, /chat-api/get-media-base64/{instance}/{id}
///
/// Media retrieval is not supported; the body is always empty.
#[derive(Debug, Serialize, Deserialize)]
pub struct MediaResponse {
    pub error: bool,
    pub id: String,
    pub base64: String,
    #[serde(default)]
    pub mimetype: Option<String>,
}

// ============================================================================
// Webhook
// ============================================================================

/// POST /webhook/{instance}
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// POST and GET /webhook/{instance}
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub error: bool,
    pub instance: String,
    pub url: Option<String>,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_text_accepts_aliases() {
        for body in [
            r#"{"number":"5511999999999","text":"hi"}"#,
            r#"{"phone":"5511999999999","body":"hi"}"#,
            r#"{"to":"5511999999999","message":"hi"}"#,
        ] {
            let req: SendTextRequest = serde_json::from_str(body).unwrap();
            assert_eq!(req.number, "5511999999999");
            assert_eq!(req.text, "hi");
        }
    }

    #[test]
    fn test_send_text_rejects_two_names_for_one_field() {
        let err = serde_json::from_str::<SendTextRequest>(
            r#"{"number":"5511999999999","to":"5511888888888","text":"hi"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate field"), "{err}");

        assert!(
            serde_json::from_str::<SendTextRequest>(r#"{"number":"1","text":"a","body":"b"}"#)
                .is_err()
        );
    }

    #[test]
    fn test_connected_qr_response_is_minimal() {
        let json = serde_json::to_value(QrResponse::connected()).unwrap();
        assert_eq!(json, serde_json::json!({"error": false, "connected": true}));
    }
}
