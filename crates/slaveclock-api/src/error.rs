//! Error types for the control API.
//!
//! [`ApiError`] maps every failure onto an HTTP status and a JSON body of
//! the form `{"error": "...", "status": 400}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use slaveclock_core::control::ControlError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body was missing, malformed, or had the wrong shape.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// A field failed validation (for example a dial reading of `25:00`).
    #[error("{0}")]
    Validation(String),

    /// The operation conflicts with a running fast set.
    #[error("{0}")]
    Conflict(String),

    /// The relays could not be switched.
    #[error("relay error: {0}")]
    Relay(String),
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Validation(e) => Self::Validation(e.to_string()),
            ControlError::SessionRunning => Self::Conflict(err.to_string()),
            ControlError::Relay(e) => Self::Relay(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
