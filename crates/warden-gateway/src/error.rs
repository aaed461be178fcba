//! Gateway error type and its HTTP mapping.
//!
//! The technical reason is logged; clients only receive the standard error
//! body with a generic business message (or the dedicated no-permissions
//! message for denials).

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;
use warden_core::{
    ErrorBody, StoreError, GENERIC_BUSINESS_ERROR_MESSAGE, JSON_CONTENT_TYPE,
    NO_PERMISSIONS_ERROR_MESSAGE,
};
use warden_policy::PolicyError;

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Request-scoped gateway failure.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The path/method pair is not in the permission index.
    #[error("not found oas definition: {method} {path}")]
    PermissionNotFound { method: String, path: String },

    /// The role store failed while resolving the caller's identity.
    #[error("user bindings retrieval failed: {0}")]
    Identity(#[from] StoreError),

    /// The policy input could not be built.
    #[error("RBAC input creation failed: {0}")]
    Input(String),

    /// The policy denied the request.
    #[error("RBAC policy evaluation failed, user is not allowed")]
    Denied,

    /// Policy evaluation itself failed.
    #[error("policy evaluation failed: {0}")]
    Policy(#[source] PolicyError),

    /// The target service could not be reached.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The response filter could not process the upstream body.
    #[error("response filtering failed: {0}")]
    ResponseFilter(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::PermissionNotFound { .. } | Self::Denied => StatusCode::FORBIDDEN,
            Self::Identity(_) | Self::Input(_) | Self::Policy(_) | Self::ResponseFilter(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn business_message(&self) -> &'static str {
        match self {
            Self::Denied => NO_PERMISSIONS_ERROR_MESSAGE,
            _ => GENERIC_BUSINESS_ERROR_MESSAGE,
        }
    }

    /// Build the standard JSON error response for an arbitrary status.
    pub fn response_body(status: StatusCode, technical: &str, business: &str) -> Response {
        let body = ErrorBody::new(status.as_u16(), technical, business);
        (
            status,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            serde_json::to_string(&body).unwrap_or_default(),
        )
            .into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        error!(status = status.as_u16(), error = %self, "request rejected");
        Self::response_body(status, &self.to_string(), self.business_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_maps_to_403_with_no_permissions_message() {
        let response = GatewayError::Denied.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_permission_not_found_maps_to_403() {
        let err = GatewayError::PermissionNotFound {
            method: "GET".into(),
            path: "/x".into(),
        };
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_store_failure_maps_to_500() {
        let err = GatewayError::Identity(StoreError::Query("boom".into()));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_failure_maps_to_502() {
        let err = GatewayError::Upstream("connection refused".into());
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_policy_error_maps_to_500() {
        let err = GatewayError::Policy(PolicyError::Evaluation("bad".into()));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
