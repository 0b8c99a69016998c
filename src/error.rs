//! # Error Handling
//!
//! Two error types live here, one per layer:
//!
//! - [`VoiceError`] is what the voice core (codec, devices, transport,
//!   session controller) returns. Most of its variants are absorbed and logged
//!   by the session; only call setup surfaces them to the caller.
//! - [`ApiError`] is what the control API returns. It knows how to turn itself
//!   into an HTTP response with a JSON body.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### thiserror
//! - **#[derive(Error)]**: `std::error::Error` and `Display` come from the
//!   `#[error("...")]` attribute on each variant
//! - **Messages**: every variant prints its layer first ("Transport error:
//!   ..."), which is what ends up in `connection_error` and in API bodies
//!
//! ### From conversions
//! - **`?` operator**: Uses `From` to convert a lower-level error into ours
//! - **Layering**: `VoiceError -> ApiError` lets handlers just write `?`

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Failures of the realtime voice core.
///
/// ## Error Categories:
/// - **Capture**: microphone permission denied, no device, unreadable source.
///   Fatal to call setup, never retried automatically.
/// - **Transport**: connect failure or connection drop. A failed first
///   connect is returned with its cause; a dropped live connection is retried
///   a bounded number of times before the session enters `error`.
/// - **Protocol**: malformed or unknown inbound event. Logged and ignored.
/// - **Backend**: the backend reported an `error` event. A non-fatal notice.
/// - **Playback**: output device failures.
/// - **InvalidLanguage** / **SessionClosed**: control-surface errors.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Unsupported language: {0}")]
    InvalidLanguage(String),

    /// The session runner has stopped and no longer accepts commands.
    #[error("Session is not running")]
    SessionClosed,
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Protocol(format!("invalid JSON payload: {}", err))
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Protocol(format!("invalid base64 audio frame: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors returned by the control API handlers.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - Unavailable → 503 (no microphone, backend unreachable, runner gone)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unavailable",
///     "message": "Transport error: connection refused",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            ApiError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Maps core failures onto HTTP semantics.
///
/// Device and connectivity problems are "unavailable" (the request was fine,
/// the environment was not); language errors are the client's fault.
impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::InvalidLanguage(_) => ApiError::BadRequest(err.to_string()),
            VoiceError::Capture(_)
            | VoiceError::Transport(_)
            | VoiceError::Playback(_)
            | VoiceError::SessionClosed => ApiError::Unavailable(err.to_string()),
            VoiceError::Protocol(_) | VoiceError::Backend(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, so they map to
/// 400 rather than 500.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_error_display() {
        let err = VoiceError::Capture("permission denied".to_string());
        assert_eq!(err.to_string(), "Capture error: permission denied");
        assert_eq!(VoiceError::SessionClosed.to_string(), "Session is not running");
    }

    #[test]
    fn test_voice_error_maps_to_http_status() {
        let api: ApiError = VoiceError::InvalidLanguage("xx".to_string()).into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);

        let api: ApiError = VoiceError::Transport("refused".to_string()).into();
        assert_eq!(api.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let api: ApiError = VoiceError::Protocol("bad frame".to_string()).into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_base64_error_is_protocol_error() {
        use base64::Engine as _;
        let err: VoiceError = base64::engine::general_purpose::STANDARD
            .decode("not base64!")
            .unwrap_err()
            .into();
        assert!(matches!(err, VoiceError::Protocol(_)));
    }
}
