//! Instance endpoints: pairing QR, status, connect.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::api::{ConnectResponse, InstanceStatusResponse, QrResponse};
use crate::handlers::problem_details;
use crate::qr;
use crate::server::AppState;

/// GET /instance/qr
pub async fn get_qr(State(state): State<AppState>) -> Response {
    let snapshot = state.lifecycle.snapshot();
    if snapshot.state.is_connected() {
        return Json(QrResponse::connected()).into_response();
    }

    let Some(artifact) = snapshot.pairing_artifact() else {
        return problem_details::not_found(format!(
            "no pairing code available (state: {})",
            snapshot.state
        ))
        .into_response();
    };

    match qr::render_png_data_url(&artifact.code) {
        Ok(url) => Json(QrResponse {
            error: false,
            connected: false,
            state: Some(snapshot.state),
            qr: Some(url),
            code: Some(artifact.code.clone()),
            issued_at: Some(artifact.issued_at),
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render pairing QR");
            problem_details::internal_error("failed to render pairing code").into_response()
        }
    }
}

/// GET /instance/status, GET /instance
pub async fn get_status(State(state): State<AppState>) -> Json<InstanceStatusResponse> {
    Json(status_body(&state))
}

/// GET /instance/{name}
pub async fn get_named(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(problem) = state.check_instance(&name) {
        return problem.into_response();
    }
    Json(status_body(&state)).into_response()
}

/// POST /instance/connect, POST /instance/create
pub async fn connect(State(state): State<AppState>) -> Response {
    match state.lifecycle.request_connect().await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Connect requested via API");
            Json(ConnectResponse {
                error: false,
                outcome,
                state: state.lifecycle.current_state(),
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Connect request failed");
            problem_details::internal_error(e.to_string()).into_response()
        }
    }
}

fn status_body(state: &AppState) -> InstanceStatusResponse {
    let snapshot = state.lifecycle.snapshot();
    InstanceStatusResponse {
        error: false,
        instance: state.instance_name.clone(),
        state: snapshot.state,
        connected: snapshot.state.is_connected(),
        account: snapshot.account,
        updated_at: snapshot.updated_at,
    }
}
