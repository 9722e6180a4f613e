//! Unauthenticated status endpoints.

use axum::Json;
use axum::extract::State;
use axum::response::Html;
use chrono::Utc;
use tracing::warn;

use crate::api::{HealthResponse, RootResponse};
use crate::lifecycle::ConnectionState;
use crate::qr;
use crate::server::AppState;

/// Seconds between refreshes of the pairing page.
const QR_PAGE_REFRESH_SECONDS: u32 = 5;

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let current = state.lifecycle.current_state();
    Json(RootResponse {
        instance: state.instance_name.clone(),
        state: current,
        connected: current.is_connected(),
        timestamp: Utc::now(),
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: uptime,
    })
}

/// GET /qr
///
/// Human-facing pairing page that refreshes itself until the session connects.
pub async fn qr_page(State(state): State<AppState>) -> Html<String> {
    let snapshot = state.lifecycle.snapshot();

    let body = match (snapshot.state, snapshot.pairing_artifact()) {
        (ConnectionState::Connected, _) => "<h1>Connected</h1><p>WhatsApp is linked.</p>".to_string(),
        (_, Some(artifact)) => match qr::render_png_data_url(&artifact.code) {
            Ok(url) => format!(
                "<h1>Scan with WhatsApp</h1><img src=\"{url}\" alt=\"pairing QR code\"><p>Issued {}</p>",
                artifact.issued_at.to_rfc3339()
            ),
            Err(e) => {
                warn!(error = %e, "Failed to render pairing QR");
                "<h1>Pairing code unavailable</h1>".to_string()
            }
        },
        (current, None) => format!("<h1>Waiting for pairing code</h1><p>State: {current}</p>"),
    };

    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"{QR_PAGE_REFRESH_SECONDS}\">\
         <title>{} - WhatsApp pairing</title></head><body>{body}</body></html>",
        html_escape(&state.instance_name)
    ))
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
        assert_eq!(html_escape("main"), "main");
    }
}
