//! HTTP error mapping
//!
//! Every error leaves the daemon as `{"error": "<message>"}`. Only request
//! problems reach this type: the relay absorbs backend and storage failures
//! into the answer itself.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use relay_core::{HistoryError, ValidationError};

/// Error returned by a route handler
#[derive(Error, Debug)]
pub enum ApiError {
    /// The question was rejected
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The body was not the expected JSON
    #[error("{0}")]
    BadRequest(String),

    /// Anything the client cannot fix
    #[error("{0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Result type for route handlers
pub type ApiResult<T> = Result<T, ApiError>;
