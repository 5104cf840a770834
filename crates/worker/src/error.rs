//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use thiserror::Error;

/// Errors a handler can return. Rendered as `{ "error": "<message>" }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// The submitted payment details did not validate.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Domain(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(SagaError::WorkflowNotFound(_) | SagaError::RunNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Saga(
                SagaError::WorkflowAlreadyStarted(_)
                | SagaError::AlreadyFinished(_)
                | SagaError::RunNotFinished(_),
            ) => StatusCode::CONFLICT,
            ApiError::Saga(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
