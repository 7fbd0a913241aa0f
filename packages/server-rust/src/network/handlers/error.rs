//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::service::OperationError;

/// An error rendered as `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Status code for an operation failure.
#[must_use]
pub fn status_code(err: &OperationError) -> StatusCode {
    match err {
        OperationError::BadRequest(_) => StatusCode::BAD_REQUEST,
        OperationError::NotFound(_) => StatusCode::NOT_FOUND,
        OperationError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OperationError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        OperationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OperationError::Bootstrap(_)
        | OperationError::UnexpectedResponse { .. }
        | OperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        let status = status_code(&err);
        // Server-side failures are logged in full; the client gets a generic body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "operation failed");
            "internal server error".to_string()
        } else {
            err.to_string()
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
