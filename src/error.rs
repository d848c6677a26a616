//! Error taxonomy for the relay.
//!
//! Every failure the core can raise is a [`RelayError`]. Transport adapters
//! map it onto their own framing: an HTTP status with a `{"detail": ...}` body,
//! a final `{"error": ...}` SSE frame, or a typed socket error message.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors raised by the gateway, the classifier, and request validation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A required inbound field is missing or invalid. No upstream call was made.
    #[error("{0}")]
    Validation(String),

    /// The upstream service answered with a non-2xx status.
    #[error("Dify API error: {status} - {body}")]
    Upstream {
        /// HTTP status code returned by the upstream service.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Network-level failure: connect error, timeout, broken stream.
    #[error("Failed to call Dify API: {0}")]
    Transport(String),

    /// A non-streaming upstream body could not be decoded.
    #[error("Invalid response from Dify API: {0}")]
    Parse(String),

    /// The upstream stream reported an `error` event mid-exchange.
    #[error("Dify stream error ({code}): {message}")]
    StreamEvent {
        /// Upstream error code, `unknown` when absent.
        code: String,
        /// Upstream error message.
        message: String,
    },
}

impl RelayError {
    /// HTTP status used when this error ends a request/response exchange.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Malformed request bodies answer with the same `{"detail": ...}` envelope.
impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
