//! Response-side policy filtering.
//!
//! When a route names a response policy, the upstream response runs through
//! a second evaluation with `response.body` populated:
//!
//! `Received → Decoded → Evaluated → (Allowed-Rewrite | Denied-Rewrite |
//! Passthrough) → Written`
//!
//! Non-JSON bodies pass through untouched. A denial replaces the body with
//! the standard 403 error; an allowed policy that returns a value replaces
//! the body with that value, re-encoded with a recomputed Content-Length.

use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_core::{UserInfo, JSON_CONTENT_TYPE, NO_PERMISSIONS_ERROR_MESSAGE};
use warden_openapi::PolicyConfig;
use warden_policy::{EvalContext, PolicyError};

use crate::error::{GatewayError, Result};
use crate::input::{build_input, RequestSummary};
use crate::proxy::{build_response, proxy_headers, ProxyResponse};
use crate::server::AppState;

/// Re-evaluate the upstream response against the route's response policy
/// and rewrite it accordingly.
pub async fn filter_response(
    state: &AppState,
    summary: &RequestSummary,
    user: &UserInfo,
    config: &PolicyConfig,
    upstream: ProxyResponse,
    cancel: &CancellationToken,
) -> Result<Response> {
    if !upstream.content_type().starts_with(JSON_CONTENT_TYPE) {
        debug!(
            content_type = upstream.content_type(),
            "response is not JSON, passing through"
        );
        return Ok(build_response(upstream));
    }

    let decoded: Value = serde_json::from_slice(&upstream.body).map_err(|e| {
        GatewayError::ResponseFilter(format!("failed response body deserialization: {e}"))
    })?;

    let prepared = state
        .cache
        .get_or_prepare(&state.module, &config.response_policy)
        .map_err(GatewayError::Policy)?;

    let decision = {
        let env = Arc::clone(&state.env);
        let store = state.store.clone();
        let summary = summary.clone();
        let user = user.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<warden_policy::Decision> {
            let input = build_input(&summary, &env, &user, Some(&decoded))?;
            let ctx = EvalContext {
                store: store.as_deref(),
                cancellation: Some(&cancel),
            };
            prepared.bind(&input, ctx).evaluate().map_err(GatewayError::Policy)
        })
        .await
        .map_err(|e| {
            GatewayError::Policy(PolicyError::Evaluation(format!(
                "response evaluation task failed: {e}"
            )))
        })??
    };

    if !decision.allowed {
        debug!(policy = %config.response_policy, "response policy denied, rewriting body");
        return Ok(GatewayError::response_body(
            StatusCode::FORBIDDEN,
            "RBAC policy evaluation on response failed",
            NO_PERMISSIONS_ERROR_MESSAGE,
        ));
    }

    match decision.value {
        Some(value) => {
            let body = serde_json::to_vec(&value).map_err(|e| {
                GatewayError::ResponseFilter(format!("failed filtered body serialization: {e}"))
            })?;
            // Content-Length was stripped with the hop-by-hop headers and is
            // recomputed from the rewritten body
            let mut response = Response::builder().status(upstream.status);
            if let Some(headers) = response.headers_mut() {
                *headers = proxy_headers(&upstream.headers);
            }
            response.body(Body::from(body)).map_err(|e| {
                GatewayError::ResponseFilter(format!("failed filtered response build: {e}"))
            })
        }
        None => Ok(build_response(upstream)),
    }
}
