//! The enforcement handler.
//!
//! Registered as the router's catch-all, it composes the whole pipeline:
//! permission lookup, identity resolution, input assembly, policy
//! evaluation (full or partial), and the terminal step — deny, answer with
//! an empty result, echo the filter in standalone mode, or proxy upstream
//! with the optional response filter.
//!
//! Identity, input and evaluation are synchronous and run together on the
//! blocking pool; the request future holds a cancellation guard so a caller
//! disconnect aborts store-backed built-ins at their checkpoint.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, request::Parts, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_core::{Environment, RoleStore, UserInfo, BASE_ROW_FILTER_HEADER_KEY, JSON_CONTENT_TYPE};
use warden_openapi::PolicyConfig;
use warden_policy::{translate, EvalContext, PolicyError, PreparedPolicy};

use crate::error::{GatewayError, Result};
use crate::identity::resolve_identity;
use crate::input::{build_input, has_json_content_type, RequestSummary};
use crate::proxy::{build_response, target_url, ProxyRequest};
use crate::response::filter_response;
use crate::server::AppState;

/// Upper bound on buffered request bodies.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Axum entry point: every path not claimed by health or standalone routes
/// lands here.
pub async fn enforcement_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    match handle(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: &AppState, request: Request<Body>) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let raw_path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or_default().to_string();

    let eval_path = strip_standalone_prefix(&state.env, &raw_path);

    let body = to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| GatewayError::Input(format!("failed request body read: {e}")))?;

    let route = match state.index.find(&method, &eval_path) {
        Ok(route) => route,
        Err(_) => {
            if is_documentation_path(&state.env, &eval_path) {
                debug!(path = %eval_path, "documentation path outside the index, proxying");
                return forward_plain(state, &parts, &raw_path, &query, body).await;
            }
            return Err(GatewayError::PermissionNotFound {
                method,
                path: eval_path,
            });
        }
    };

    if !route.config.requires_authorization() {
        debug!(path = %eval_path, "route carries no request policy, proxying");
        return forward_plain(state, &parts, &raw_path, &query, body).await;
    }

    let summary = RequestSummary {
        method,
        path: eval_path,
        query: query.clone(),
        headers: parts.headers.clone(),
        path_params: route.path_params.clone(),
        body: body.clone(),
    };

    let prepared = state
        .cache
        .get_or_prepare(&state.module, &route.config.request_policy)
        .map_err(GatewayError::Policy)?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let decision = {
        let env = Arc::clone(&state.env);
        let store = state.store.clone();
        let config = route.config.clone();
        let summary = summary.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            evaluate_request(&env, store.as_deref(), &prepared, &config, &summary, &cancel)
        })
        .await
        .map_err(|e| {
            GatewayError::Policy(PolicyError::Evaluation(format!("evaluation task failed: {e}")))
        })??
    };

    match decision {
        RequestDecision::EmptyFilter { json_request: true } => Ok(empty_result_response()),
        RequestDecision::EmptyFilter { json_request: false } => Err(GatewayError::Denied),
        RequestDecision::Forward { user, filter, .. } => {
            if state.env.standalone {
                return standalone_response(filter.as_ref());
            }

            let mut headers = parts.headers.clone();
            if let Some(filter) = &filter {
                let name = HeaderName::from_bytes(filter.name.as_bytes())
                    .map_err(|e| GatewayError::Input(format!("invalid filter header name: {e}")))?;
                let value = HeaderValue::from_str(&filter.value)
                    .map_err(|e| GatewayError::Input(format!("invalid filter header value: {e}")))?;
                headers.insert(name, value);
            }

            let upstream = state
                .upstream
                .forward(ProxyRequest {
                    method: parts.method.clone(),
                    url: target_url(&state.env.target_service_host, &raw_path, &query),
                    headers,
                    body,
                })
                .await?;

            if route.config.response_policy.is_empty() {
                Ok(build_response(upstream))
            } else {
                filter_response(state, &summary, &user, &route.config, upstream, &cancel).await
            }
        }
    }
}

// ----------------------------------------------------------------------
// Request-phase evaluation (blocking)
// ----------------------------------------------------------------------

/// Filter header produced by partial evaluation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterHeader {
    pub name: String,
    pub value: String,
}

/// Outcome of the request-phase pipeline.
pub(crate) enum RequestDecision {
    /// Allowed: forward upstream (or echo in standalone mode).
    Forward {
        user: UserInfo,
        filter: Option<FilterHeader>,
        /// Value returned by an allow-only policy, handed to the response
        /// phase as additional context.
        #[allow(dead_code)]
        value: Option<Value>,
    },
    /// The filter reduced to "nothing can match".
    EmptyFilter { json_request: bool },
}

pub(crate) fn evaluate_request(
    env: &Environment,
    store: Option<&dyn RoleStore>,
    prepared: &PreparedPolicy,
    config: &PolicyConfig,
    summary: &RequestSummary,
    cancel: &CancellationToken,
) -> Result<RequestDecision> {
    let user = resolve_identity(&summary.headers, env, store)?;
    let input = build_input(summary, env, &user, None)?;
    let ctx = EvalContext {
        store,
        cancellation: Some(cancel),
    };
    let evaluator = prepared.bind(&input, ctx);

    if config.generate_query {
        let translated = evaluator
            .partial_evaluate()
            .and_then(|queries| translate(&queries).map_err(PolicyError::from));
        match translated {
            Ok(query) => {
                let name = if config.query_header_name.is_empty() {
                    BASE_ROW_FILTER_HEADER_KEY.to_string()
                } else {
                    config.query_header_name.clone()
                };
                let value = serde_json::to_string(&query).map_err(|e| {
                    GatewayError::Input(format!("failed row filter serialization: {e}"))
                })?;
                Ok(RequestDecision::Forward {
                    user,
                    filter: Some(FilterHeader { name, value }),
                    value: None,
                })
            }
            Err(e) if e.is_empty_query() => Ok(RequestDecision::EmptyFilter {
                json_request: has_json_content_type(&summary.headers),
            }),
            Err(e) => Err(GatewayError::Policy(e)),
        }
    } else {
        let decision = evaluator.evaluate().map_err(GatewayError::Policy)?;
        if !decision.allowed {
            return Err(GatewayError::Denied);
        }
        Ok(RequestDecision::Forward {
            user,
            filter: None,
            value: decision.value,
        })
    }
}

// ----------------------------------------------------------------------
// Terminal responses
// ----------------------------------------------------------------------

async fn forward_plain(
    state: &AppState,
    parts: &Parts,
    raw_path: &str,
    query: &str,
    body: Bytes,
) -> Result<Response> {
    if state.env.standalone {
        return standalone_response(None);
    }
    let upstream = state
        .upstream
        .forward(ProxyRequest {
            method: parts.method.clone(),
            url: target_url(&state.env.target_service_host, raw_path, query),
            headers: parts.headers.clone(),
            body,
        })
        .await?;
    Ok(build_response(upstream))
}

/// `200 []` for a filter that matches nothing on a JSON request.
fn empty_result_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
        "[]",
    )
        .into_response()
}

/// Standalone mode: a synthetic 200 carrying the filter header, letting
/// another component act on the decision.
fn standalone_response(filter: Option<&FilterHeader>) -> Result<Response> {
    let mut response = StatusCode::OK.into_response();
    if let Some(filter) = filter {
        let name = HeaderName::from_bytes(filter.name.as_bytes())
            .map_err(|e| GatewayError::Input(format!("invalid filter header name: {e}")))?;
        let value = HeaderValue::from_str(&filter.value)
            .map_err(|e| GatewayError::Input(format!("invalid filter header value: {e}")))?;
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}

/// Strip the standalone prefix once, never twice.
fn strip_standalone_prefix(env: &Environment, path: &str) -> String {
    if !env.standalone || env.path_prefix_standalone.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(&env.path_prefix_standalone) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

fn is_documentation_path(env: &Environment, path: &str) -> bool {
    !env.target_service_oas_path.is_empty() && path == env.target_service_oas_path
}
