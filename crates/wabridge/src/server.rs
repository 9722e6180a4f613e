use std::any::Any;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::error;

use crate::handlers::{self, problem_details};
use crate::lifecycle::LifecycleHandle;
use crate::webhook::WebhookTargets;

/// Maximum accepted request body.
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleHandle,
    pub webhooks: WebhookTargets,
    pub instance_name: String,
    pub api_key: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Reject path instance names other than ours.
    pub(crate) fn check_instance(&self, name: &str) -> Result<(), problem_details::Problem> {
        if name == self.instance_name {
            Ok(())
        } else {
            Err(problem_details::not_found(format!(
                "instance '{name}' not found"
            )))
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    // Authenticated instance API
    let api_routes = Router::new()
        .route("/instance/qr", get(handlers::get_qr))
        .route("/instance/status", get(handlers::get_status))
        .route("/instance", get(handlers::get_status))
        .route("/instance/{name}", get(handlers::get_named))
        .route("/instance/connect", post(handlers::connect))
        .route("/instance/create", post(handlers::connect))
        .route("/message/text", post(handlers::send_text))
        .route("/messages-api", post(handlers::send_text))
        .route("/sendText/{instance}", post(handlers::send_text_for_instance))
        .route("/message/media/{id}", get(handlers::get_media))
        .route(
            "/chat-api/get-media-base64/{instance}/{id}",
            get(handlers::get_media_base64),
        )
        .route(
            "/webhook/{instance}",
            get(handlers::get_webhook).post(handlers::set_webhook),
        )
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::api_auth::require_api_key,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/qr", get(handlers::qr_page))
        .with_state(state)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Turn a handler panic into a 500; the server keeps running.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Request handler panicked");
    problem_details::internal_error("internal server error").into_response()
}
