//! Best-effort delivery of inbound messages to the webhook target.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::background::BackgroundTasks;
use crate::connector::InboundMessage;

use super::{MessageNotifier, WebhookTargets};

/// Event tag carried by every delivery.
pub const EVENT_MESSAGES_UPSERT: &str = "messages.upsert";

/// Instance details copied into every payload.
#[derive(Debug, Clone, Default)]
pub struct NotifierIdentity {
    pub instance: String,
    pub api_key: Option<String>,
    pub server_url: Option<String>,
}

/// Body POSTed to the webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub instance: &'a str,
    pub data: &'a InboundMessage,
    pub event: &'static str,
    pub apikey: Option<&'a str>,
    pub sender: &'a str,
    pub date_time: String,
    pub server_url: Option<&'a str>,
    pub destination: &'a str,
}

/// What happened to a single delivery. Only used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No URL configured or delivery disabled.
    Skipped,
    Delivered,
    /// The endpoint answered with a non-2xx status.
    Rejected(u16),
    /// Network error or timeout.
    Failed,
}

/// Forwards inbound messages to the configured webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    targets: WebhookTargets,
    identity: Arc<NotifierIdentity>,
    tasks: BackgroundTasks,
}

impl WebhookNotifier {
    pub fn new(
        targets: WebhookTargets,
        identity: NotifierIdentity,
        timeout: Duration,
        tasks: BackgroundTasks,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            targets,
            identity: Arc::new(identity),
            tasks,
        })
    }

    /// Deliver one message. Never fails; problems are logged.
    pub async fn deliver(&self, message: &InboundMessage) -> DeliveryOutcome {
        // Read once; a concurrent reconfiguration applies to the next delivery.
        let target = self.targets.get().await;
        let Some(url) = target.active_url() else {
            debug!(message_id = %message.message_id, "No webhook configured, skipping");
            return DeliveryOutcome::Skipped;
        };

        let payload = WebhookPayload {
            instance: &self.identity.instance,
            data: message,
            event: EVENT_MESSAGES_UPSERT,
            apikey: self.identity.api_key.as_deref(),
            sender: &message.sender.id,
            date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            server_url: self.identity.server_url.as_deref(),
            destination: url,
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(url = %url, message_id = %message.message_id, "Webhook delivered");
                    DeliveryOutcome::Delivered
                } else {
                    warn!(
                        url = %url,
                        status = %status,
                        message_id = %message.message_id,
                        "Webhook rejected delivery"
                    );
                    DeliveryOutcome::Rejected(status.as_u16())
                }
            }
            Err(e) => {
                error!(
                    url = %url,
                    error = %e,
                    timeout = e.is_timeout(),
                    "Failed to deliver webhook"
                );
                DeliveryOutcome::Failed
            }
        }
    }
}

impl MessageNotifier for WebhookNotifier {
    fn notify(&self, message: InboundMessage) {
        let notifier = self.clone();
        self.tasks.spawn(async move {
            notifier.deliver(&message).await;
        });
    }
}
