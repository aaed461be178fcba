//! Standalone-mode binding CRUD forwarding.
//!
//! In standalone deployments the gateway exposes grant/revoke endpoints
//! that forward verbatim to the external bindings CRUD service; the CRUD
//! logic itself lives there.

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::proxy::{build_response, ProxyRequest};
use crate::server::AppState;

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// `POST /grant/bindings/resource/{resourceType}`
pub async fn grant_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    request: Request<Body>,
) -> Response {
    match forward_binding_request(&state, "grant", &resource_type, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// `POST /revoke/bindings/resource/{resourceType}`
pub async fn revoke_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    request: Request<Body>,
) -> Response {
    match forward_binding_request(&state, "revoke", &resource_type, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward_binding_request(
    state: &AppState,
    action: &str,
    resource_type: &str,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| GatewayError::Input(format!("failed request body read: {e}")))?;

    let base = state.env.bindings_crud_service_url.trim_end_matches('/');
    let url = format!("{base}/{action}/bindings/resource/{resource_type}");
    debug!(url = %url, "forwarding binding request to CRUD service");

    let upstream = state
        .upstream
        .forward(ProxyRequest {
            method: parts.method,
            url,
            headers: parts.headers,
            body,
        })
        .await?;
    Ok(build_response(upstream))
}
