//! Webhook configuration endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::api::{WebhookRequest, WebhookResponse};
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::webhook::WebhookTarget;

/// POST /webhook/{instance}
pub async fn set_webhook(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    body: Result<Json<WebhookRequest>, JsonRejection>,
) -> Response {
    if let Err(problem) = state.check_instance(&instance) {
        return problem.into_response();
    }
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return problem_details::bad_request(rejection.body_text()).into_response(),
    };

    match state.webhooks.update(req.url, req.enabled).await {
        Ok(target) => {
            info!(url = ?target.url, enabled = target.enabled, "Webhook reconfigured");
            Json(response_body(&state, target)).into_response()
        }
        Err(e) => problem_details::bad_request(e.to_string()).into_response(),
    }
}

/// GET /webhook/{instance}
pub async fn get_webhook(State(state): State<AppState>, Path(instance): Path<String>) -> Response {
    if let Err(problem) = state.check_instance(&instance) {
        return problem.into_response();
    }
    let target = state.webhooks.get().await;
    Json(response_body(&state, target)).into_response()
}

fn response_body(state: &AppState, target: WebhookTarget) -> WebhookResponse {
    WebhookResponse {
        error: false,
        instance: state.instance_name.clone(),
        url: target.url,
        enabled: target.enabled,
    }
}
