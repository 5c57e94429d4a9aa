use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use queue_core::error::QueueError;
use serde_json::json;

/// Management API error, already carrying the HTTP status it maps to.
/// `IntoResponse` wraps it in the standard `{success, error}` envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::InvalidPriority(_)
            | QueueError::PayloadTooLarge { .. }
            | QueueError::SerializationError(_) => StatusCode::BAD_REQUEST,
            QueueError::WorkerMismatch
            | QueueError::JobNotProcessing
            | QueueError::JobCanceled
            | QueueError::JobAlreadyTerminal
            | QueueError::JobFailed(_) => StatusCode::CONFLICT,
            QueueError::BackendUnsupported(_) => StatusCode::BAD_REQUEST,
            QueueError::JobTypeNotRegistered(_) | QueueError::JobTypeAlreadyRegistered(_) => {
                StatusCode::BAD_REQUEST
            }
            QueueError::WorkerShutdown | QueueError::Store(_) | QueueError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}
