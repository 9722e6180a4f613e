//! Outbound webhook for inbound messages.
//!
//! The target is mutable at runtime through the API. Each delivery reads it once,
//! so a reconfiguration only affects deliveries that start after it.

mod notifier;

pub use notifier::{
    DeliveryOutcome, EVENT_MESSAGES_UPSERT, NotifierIdentity, WebhookNotifier, WebhookPayload,
};

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::WebhookConfig;
use crate::connector::InboundMessage;

/// Receives inbound messages from the lifecycle controller.
///
/// `notify` must return promptly; delivery happens elsewhere and its outcome is
/// never reported back.
pub trait MessageNotifier: Send + Sync {
    fn notify(&self, message: InboundMessage);
}

/// Where inbound messages are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookTarget {
    pub url: Option<String>,
    pub enabled: bool,
}

impl Default for WebhookTarget {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

impl WebhookTarget {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            url: config.url.clone().filter(|u| !u.trim().is_empty()),
            enabled: config.enabled,
        }
    }

    /// The URL to deliver to, if delivery is on.
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.url.as_deref()
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Shared, runtime-reconfigurable webhook target.
#[derive(Debug, Clone, Default)]
pub struct WebhookTargets {
    inner: Arc<RwLock<WebhookTarget>>,
}

impl WebhookTargets {
    pub fn new(target: WebhookTarget) -> Self {
        Self {
            inner: Arc::new(RwLock::new(target)),
        }
    }

    /// Copy of the current target.
    pub async fn get(&self) -> WebhookTarget {
        self.inner.read().await.clone()
    }

    /// Replace the URL and/or the enabled flag.
    ///
    /// An empty URL clears it. The URL is only checked for syntax; nothing is
    /// contacted.
    pub async fn update(
        &self,
        url: Option<String>,
        enabled: Option<bool>,
    ) -> Result<WebhookTarget, WebhookError> {
        let url = match url {
            Some(raw) if raw.trim().is_empty() => Some(None),
            Some(raw) => Some(Some(validate_url(raw.trim())?)),
            None => None,
        };

        let mut target = self.inner.write().await;
        if let Some(url) = url {
            target.url = url;
        }
        if let Some(enabled) = enabled {
            target.enabled = enabled;
        }
        Ok(target.clone())
    }
}

fn validate_url(raw: &str) -> Result<String, WebhookError> {
    let invalid = |reason: String| WebhookError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let parsed = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_treats_empty_url_as_unset() {
        let target = WebhookTarget::from_config(&WebhookConfig {
            url: Some("  ".to_string()),
            ..Default::default()
        });
        assert_eq!(target.url, None);
        assert_eq!(target.active_url(), None);
    }

    #[test]
    fn test_active_url_respects_enabled() {
        let mut target = WebhookTarget {
            url: Some("http://example.com/hook".to_string()),
            enabled: true,
        };
        assert_eq!(target.active_url(), Some("http://example.com/hook"));

        target.enabled = false;
        assert_eq!(target.active_url(), None);
    }

    #[tokio::test]
    async fn test_default_target_matches_config_default() {
        let target = WebhookTargets::default().get().await;
        assert_eq!(target, WebhookTarget::from_config(&WebhookConfig::default()));
        assert!(target.enabled);
        assert_eq!(target.url, None);
    }

    #[tokio::test]
    async fn test_update_replaces_fields_independently() {
        let targets = WebhookTargets::default();

        let target = targets
            .update(Some("https://example.com/hook".to_string()), None)
            .await
            .unwrap();
        assert_eq!(target.url.as_deref(), Some("https://example.com/hook"));
        assert!(target.enabled);

        let target = targets.update(None, Some(false)).await.unwrap();
        assert_eq!(target.url.as_deref(), Some("https://example.com/hook"));
        assert!(!target.enabled);

        let target = targets.update(Some(String::new()), None).await.unwrap();
        assert_eq!(target.url, None);
        assert_eq!(targets.get().await, target);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_url_without_changing_target() {
        let targets = WebhookTargets::new(WebhookTarget {
            url: Some("http://example.com/hook".to_string()),
            enabled: true,
        });

        for bad in ["not a url", "ftp://example.com/hook", "http://"] {
            let err = targets.update(Some(bad.to_string()), Some(false)).await;
            assert!(matches!(err, Err(WebhookError::InvalidUrl { .. })), "{bad}");
        }

        let target = targets.get().await;
        assert_eq!(target.url.as_deref(), Some("http://example.com/hook"));
        assert!(target.enabled);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_accepted() {
        let targets = WebhookTargets::default();
        let target = targets
            .update(Some("http://127.0.0.1:1/hook".to_string()), Some(true))
            .await
            .unwrap();
        assert_eq!(target.active_url(), Some("http://127.0.0.1:1/hook"));
    }
}
