//! Policy input assembly.
//!
//! The input object is fully materialized before any policy call: request
//! metadata, multi-map headers and query, captured path parameters, the
//! caller's identity, and (in the response phase) the decoded upstream body.
//!
//! The request body is parsed as JSON only when the content type begins
//! with `application/json`, the body is non-empty, and the method is a
//! write; the buffered bytes are handed back to the proxy untouched, so the
//! upstream sees exactly what the client sent.

use std::collections::HashMap;

use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use warden_core::{Environment, UserInfo, JSON_CONTENT_TYPE};

use crate::error::GatewayError;

/// Everything about the inbound request that policy input needs, captured
/// once per request.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: String,
    /// Path used for evaluation (standalone prefix already stripped).
    pub path: String,
    /// Raw query string, still encoded.
    pub query: String,
    pub headers: HeaderMap,
    pub path_params: HashMap<String, String>,
    pub body: Bytes,
}

/// Whether the request carries a JSON content type.
pub fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(JSON_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Build the policy input document.
pub fn build_input(
    summary: &RequestSummary,
    env: &Environment,
    user: &UserInfo,
    response_body: Option<&Value>,
) -> Result<Value, GatewayError> {
    let request_body = parse_request_body(summary)?;

    let client_type = summary
        .headers
        .get(env.client_type_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    Ok(json!({
        "request": {
            "method": summary.method,
            "path": summary.path,
            "headers": headers_to_multimap(&summary.headers),
            "query": query_to_multimap(&summary.query),
            "pathParams": summary.path_params,
            "body": request_body,
        },
        "response": {
            "body": response_body.cloned().unwrap_or(Value::Null),
        },
        "user": {
            "properties": user.properties,
            "groups": user.groups,
            "bindings": user.bindings,
            "roles": user.roles,
        },
        "clientType": client_type,
    }))
}

/// Parse the request body when the JSON gate is met; `null` otherwise.
fn parse_request_body(summary: &RequestSummary) -> Result<Value, GatewayError> {
    let is_write = matches!(summary.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    let should_parse =
        is_write && has_json_content_type(&summary.headers) && !summary.body.is_empty();

    if !should_parse {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&summary.body)
        .map_err(|e| GatewayError::Input(format!("failed request body deserialization: {e}")))
}

/// Headers as a multi-map keyed by the canonical (title-cased) name, the
/// form policies index directly; `get_header` handles the rest.
pub fn headers_to_multimap(headers: &HeaderMap) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();
        map.insert(canonical_header_name(name.as_str()), Value::Array(values));
    }
    Value::Object(map)
}

/// Canonical HTTP header form: each dash-separated part capitalized
/// (`content-type` → `Content-Type`).
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Query string as a multi-map of decoded keys to decoded value lists.
pub fn query_to_multimap(query: &str) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let entry = map
            .entry(key.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value.into_owned()));
        }
    }
    Value::Object(map)
}
