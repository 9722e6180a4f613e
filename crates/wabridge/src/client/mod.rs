//! HTTP client for a running wabridge server.
//!
//! Used by the `status` and `connect` CLI commands.

mod error;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::Deserialize;

use crate::api::{ConnectResponse, HealthResponse, InstanceStatusResponse};
use crate::handlers::api_auth::API_KEY_HEADER;

/// HTTP client for a wabridge server.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl BridgeClient {
    /// Create a client for `base_url`, e.g. `http://127.0.0.1:8080`.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: Client::new(),
        }
    }

    /// GET /health
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.http.get(self.url("/health")).send().await?;
        self.json_response(response).await
    }

    /// GET /instance/status
    pub async fn status(&self) -> Result<InstanceStatusResponse> {
        let response = self
            .authorized(self.http.get(self.url("/instance/status")))
            .send()
            .await?;
        self.json_response(response).await
    }

    /// POST /instance/connect
    pub async fn connect(&self) -> Result<ConnectResponse> {
        let response = self
            .authorized(self.http.post(self.url("/instance/connect")))
            .send()
            .await?;
        self.json_response(response).await
    }

    // ------------------------------------------------------------------------
    // Private Helpers
    // ------------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Convert a problem+json error response into a ClientError.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        match response.json::<ProblemDetails>().await {
            Ok(problem) => ClientError::ApiError {
                status,
                message: problem.detail.unwrap_or(problem.title),
            },
            Err(_) => ClientError::ApiError {
                status,
                message: format!("HTTP {status}"),
            },
        }
    }

    async fn json_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

/// RFC 7807 Problem Details response.
#[derive(Debug, Deserialize)]
struct ProblemDetails {
    title: String,
    #[serde(default)]
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BridgeClient::new("http://127.0.0.1:8080/", None);
        assert_eq!(client.url("/health"), "http://127.0.0.1:8080/health");
    }
}
