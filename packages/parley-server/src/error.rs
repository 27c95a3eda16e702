//! HTTP error mapping.
//!
//! Every failure leaves the server as `{"error": "<text>"}` with a status
//! chosen by its kind. Store faults are logged here and reported to the
//! client with a fixed message naming the operation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use parley_core::{AuthError, HistoryError, MessagingError, StoreError, ValidationError};

/// An error returned by a handler or extractor.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed request or rejected input (400).
    #[error("{0}")]
    BadRequest(String),

    /// Username already taken (409).
    #[error("Username already exists")]
    Conflict,

    /// Missing, invalid or expired token, or bad credentials (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Store or token-issuing failure (500). Carries the client-facing text.
    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a store failure, logging it as a server fault.
    pub fn store(context: &'static str, err: StoreError) -> Self {
        tracing::error!(error = %err, "{}", context);
        ApiError::Internal(context)
    }

    pub fn messaging(context: &'static str, err: MessagingError) -> Self {
        match err {
            MessagingError::Validation(e) => e.into(),
            MessagingError::Conflict(_) => ApiError::Conflict,
            MessagingError::Store(e) => ApiError::store(context, e),
        }
    }

    pub fn history(context: &'static str, err: HistoryError) -> Self {
        match err {
            HistoryError::Validation(e) => e.into(),
            HistoryError::Store(e) => ApiError::store(context, e),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken => ApiError::Unauthorized(e.to_string()),
            AuthError::InvalidToken | AuthError::Expired => {
                ApiError::Unauthorized(AuthError::InvalidToken.to_string())
            }
            AuthError::Issue(reason) => {
                tracing::error!(error = reason.as_str(), "Failed to generate token");
                ApiError::Internal("Failed to generate token")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
