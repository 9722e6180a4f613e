//! Message endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use crate::api::{MediaResponse, SendTextRequest, SendTextResponse};
use crate::connector::ConnectorError;
use crate::handlers::problem_details::{self, Problem};
use crate::lifecycle::LifecycleError;
use crate::server::AppState;

/// POST /message/text, POST /messages-api
pub async fn send_text(
    State(state): State<AppState>,
    body: Result<Json<SendTextRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => send(&state, req).await,
        Err(rejection) => problem_details::bad_request(rejection.body_text()).into_response(),
    }
}

/// POST /sendText/{instance}
pub async fn send_text_for_instance(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    body: Result<Json<SendTextRequest>, JsonRejection>,
) -> Response {
    if let Err(problem) = state.check_instance(&instance) {
        return problem.into_response();
    }
    send_text(State(state), body).await
}

async fn send(state: &AppState, req: SendTextRequest) -> Response {
    match state.lifecycle.send_text(&req.number, &req.text).await {
        Ok(sent) => {
            debug!(to = %sent.to, message_id = %sent.message_id, "Text message sent");
            Json(SendTextResponse {
                error: false,
                message_id: sent.message_id,
                to: sent.to,
            })
            .into_response()
        }
        Err(e) => send_error(e).into_response(),
    }
}

fn send_error(e: LifecycleError) -> Problem {
    match e {
        LifecycleError::NotConnected(_) => {
            debug!(error = %e, "Send rejected");
            problem_details::bad_request(e.to_string())
        }
        LifecycleError::Send(ConnectorError::InvalidRecipient(_)) => {
            warn!(error = %e, "Send rejected");
            problem_details::bad_request(e.to_string())
        }
        LifecycleError::Send(_) | LifecycleError::ActorShutdown => {
            error!(error = %e, "Send failed");
            problem_details::internal_error(e.to_string())
        }
    }
}

/// GET /message/media/{id}
pub async fn get_media(Path(id): Path<String>) -> Json<MediaResponse> {
    Json(empty_media(id))
}

/// GET /chat-api/get-media-base64/{instance}/{id}
pub async fn get_media_base64(
    State(state): State<AppState>,
    Path((instance, id)): Path<(String, String)>,
) -> Response {
    if let Err(problem) = state.check_instance(&instance) {
        return problem.into_response();
    }
    Json(empty_media(id)).into_response()
}

fn empty_media(id: String) -> MediaResponse {
    MediaResponse {
        error: false,
        id,
        base64: String::new(),
        mimetype: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ConnectionState;
    use axum::http::StatusCode;

    #[test]
    fn test_send_error_status_mapping() {
        let cases = [
            (
                LifecycleError::NotConnected(ConnectionState::AwaitingPairing),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::Send(ConnectorError::InvalidRecipient("x".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::Send(ConnectorError::Remote {
                    code: "rate_limited".to_string(),
                    message: "slow down".to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (LifecycleError::ActorShutdown, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(send_error(error).into_response().status(), expected);
        }
    }
}
