//! Wire-level error body shared by every failure response.
//!
//! The technical reason goes to the log; the client only ever sees this
//! structure with a generic business message.

use serde::{Deserialize, Serialize};

/// JSON body of every error response emitted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// HTTP status code, repeated in the body.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Short technical reason (no stack traces, no internals).
    pub error: String,
    /// User-facing message.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body from status, technical reason and business message.
    pub fn new(status_code: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error: error.into(),
            message: message.into(),
        }
    }
}
