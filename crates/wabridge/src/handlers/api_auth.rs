//! Shared-secret authentication for the instance API.
//!
//! Behavior:
//! - Key configured: the request must carry it in the `apikey` header,
//!   `Authorization: Bearer <key>`, or the `apikey` query parameter
//! - Key not configured: only loopback clients are accepted

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Request, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::handlers::problem_details;
use crate::server::AppState;

pub const API_KEY_HEADER: &str = "apikey";

#[derive(Deserialize)]
struct ApiKeyQuery {
    apikey: Option<String>,
}

/// Key presented by the client, from header, bearer token, or query, in that order.
fn presented_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }

    Query::<ApiKeyQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.apikey)
}

/// Check a request against an optional key.
///
/// Keys are compared as SHA-256 digests so the comparison time does not depend
/// on how much of the key matched.
pub fn is_authorized(
    api_key: Option<&str>,
    addr: Option<&SocketAddr>,
    headers: &HeaderMap,
    uri: &Uri,
) -> bool {
    match api_key {
        Some(expected) => presented_key(headers, uri).is_some_and(|provided| {
            let a = Sha256::digest(provided.as_bytes());
            let b = Sha256::digest(expected.as_bytes());
            a == b
        }),
        None => addr.is_some_and(|a| a.ip().is_loopback()),
    }
}

/// Middleware that guards the instance API.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if is_authorized(
        state.api_key.as_deref(),
        addr.as_ref(),
        request.headers(),
        request.uri(),
    ) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), peer = ?addr, "Rejected unauthenticated request");
        problem_details::unauthorized("missing or invalid api key").into_response()
    }
}
