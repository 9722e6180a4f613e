//! Common test utilities.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use chrono::Utc;
use http_body_util::BodyExt;
use tokio::sync::watch;
use tower::ServiceExt;

use wabridge::connector::{
    ConnectorError, EventSink, InboundMessage, LifecycleEvent, MessageContent, Sender,
    SessionClient,
};
use wabridge::lifecycle::{
    ConnectionState, ControllerOptions, LifecycleController, LifecycleHandle,
};
use wabridge::server::{self, AppState};
use wabridge::webhook::{MessageNotifier, WebhookTargets};

pub const API_KEY: &str = "secret";
pub const INSTANCE: &str = "main";

// ============================================================================
// Fake Session Client
// ============================================================================

/// Session client driven by the test: it hands out the sinks it is given and
/// records every send.
#[derive(Default)]
pub struct FakeClient {
    sinks: Mutex<Vec<EventSink>>,
    sends: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<(String, String)>>,
}

impl FakeClient {
    pub fn connects(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    /// Make the next sends fail with a remote error.
    pub fn fail_sends(&self, code: &str, message: &str) {
        *self.send_error.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }

    /// Wait for the controller to start attempt number `n` (1-based) and return its sink.
    pub async fn wait_for_attempt(&self, n: usize) -> EventSink {
        for _ in 0..200 {
            if let Some(sink) = self.sinks.lock().unwrap().get(n - 1) {
                return sink.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection attempt {n} never started");
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn connect(&self, sink: EventSink) -> Result<(), ConnectorError> {
        self.sinks.lock().unwrap().push(sink);
        Ok(())
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ConnectorError> {
        if let Some((code, message)) = self.send_error.lock().unwrap().clone() {
            return Err(ConnectorError::Remote { code, message });
        }
        let mut sends = self.sends.lock().unwrap();
        sends.push((recipient.to_string(), text.to_string()));
        Ok(format!("MSG-{}", sends.len()))
    }
}

/// Notifier that keeps what it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<InboundMessage>>,
}

impl MessageNotifier for RecordingNotifier {
    fn notify(&self, message: InboundMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

// ============================================================================
// Test Bridge
// ============================================================================

/// A running controller plus the router in front of it.
pub struct TestBridge {
    pub app: Router,
    pub client: Arc<FakeClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub lifecycle: LifecycleHandle,
    pub webhooks: WebhookTargets,
    _shutdown_tx: watch::Sender<bool>,
}

impl TestBridge {
    pub fn new() -> Self {
        Self::with_api_key(Some(API_KEY))
    }

    pub fn with_api_key(api_key: Option<&str>) -> Self {
        let client = Arc::new(FakeClient::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (lifecycle, _task) = LifecycleController::spawn(
            client.clone(),
            notifier.clone(),
            ControllerOptions::default(),
            shutdown_rx,
        );

        let webhooks = WebhookTargets::default();
        let state = AppState {
            lifecycle: lifecycle.clone(),
            webhooks: webhooks.clone(),
            instance_name: INSTANCE.to_string(),
            api_key: api_key.map(str::to_string),
            started_at: Utc::now(),
        };

        Self {
            app: server::build_app(state, 30),
            client,
            notifier,
            lifecycle,
            webhooks,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Send a request through the router and decode the JSON body.
    pub async fn call(&self, request: Request<Body>) -> (u16, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    /// Start a connection attempt and return its sink.
    pub async fn connect(&self) -> EventSink {
        let attempt = self.client.connects() + 1;
        self.lifecycle.request_connect().await.unwrap();
        self.client.wait_for_attempt(attempt).await
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.lifecycle.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("state never became {state}"))
            .unwrap();
    }

    /// Connect and report the connection as open.
    pub async fn connected(&self) -> EventSink {
        let sink = self.connect().await;
        sink.emit(LifecycleEvent::Opened { account: None }).await;
        self.wait_for_state(ConnectionState::Connected).await;
        sink
    }
}

// ============================================================================
// Requests
// ============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("apikey", API_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("apikey", API_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn text_message(sender: &str, text: &str, from_me: bool) -> InboundMessage {
    InboundMessage {
        message_id: format!("3EB0{}", text.len()),
        chat_id: sender.to_string(),
        sender: Sender {
            id: sender.to_string(),
            display_name: None,
        },
        from_me,
        content: MessageContent::Text {
            text: text.to_string(),
        },
        timestamp: None,
        raw: serde_json::Value::Null,
    }
}
