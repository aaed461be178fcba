//! Rewriting reverse proxy.
//!
//! Forwards allowed requests to the target service over plain HTTP with the
//! original path and query, strips hop-by-hop headers in both directions,
//! and surfaces transport failures as 502. The client deliberately sends no
//! default `User-Agent`, so a caller that set none stays anonymous upstream.
//!
//! The transport is a trait so tests can observe exactly what would be sent
//! without a live backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;

use crate::error::GatewayError;

/// Headers that never cross the proxy boundary.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A fully buffered request to forward upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Absolute URL, path and query preserved from the inbound request.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    /// Content-Type of the upstream response, empty when absent.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// Transport used to reach the target service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Forward a buffered request and read the full response.
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, GatewayError>;
}

/// Default transport over a shared reqwest client.
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new() -> Self {
        // no .user_agent(): when the caller sent none, none is forwarded
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        debug!(method = %request.method, url = %request.url, "forwarding to upstream");

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| GatewayError::Upstream(format!("invalid method: {e}")))?;

        let mut builder = self.client.request(method, &request.url);
        let mut last_name: Option<HeaderName> = None;
        for (name, value) in proxy_headers(&request.headers) {
            let name = match name {
                Some(name) => name,
                None => last_name.clone().expect("HeaderMap always yields a name for the first value of a key"),
            };
            last_name = Some(name.clone());
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                axum::http::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// Build the absolute upstream URL from the target host and the inbound
/// path/query (still percent-encoded, exactly as received).
pub fn target_url(host: &str, path: &str, query: &str) -> String {
    if query.is_empty() {
        format!("http://{host}{path}")
    } else {
        format!("http://{host}{path}?{query}")
    }
}

/// Headers to forward across the proxy: everything except hop-by-hop
/// headers, `Host` (rewritten by the transport) and `Content-Length`
/// (recomputed from the buffered body).
pub fn proxy_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers {
        let lowered = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lowered.as_str())
            || lowered == "host"
            || lowered == "content-length"
        {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Turn an upstream response into the response written to the caller.
pub fn build_response(upstream: ProxyResponse) -> Response {
    let mut response = Response::builder().status(upstream.status);
    if let Some(headers) = response.headers_mut() {
        *headers = proxy_headers(&upstream.headers);
    }
    response
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
