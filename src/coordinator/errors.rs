//! Coordinator-facing error type and its HTTP/JSON rendering

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::api::types::{FailureEnvelope, FailureKind};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("capacity: {0}")]
    Capacity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("liveness: {0}")]
    Liveness(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    fn kind(&self) -> FailureKind {
        match self {
            CoordinatorError::Validation(_) => FailureKind::Validation,
            CoordinatorError::Capacity(_) => FailureKind::Capacity,
            CoordinatorError::NotFound(_) => FailureKind::Validation,
            CoordinatorError::Conflict(_) => FailureKind::Conflict,
            CoordinatorError::Liveness(_) => FailureKind::Liveness,
            CoordinatorError::Store(_) | CoordinatorError::Internal(_) => FailureKind::Backend,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Capacity(_) => StatusCode::CONFLICT,
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::Liveness(_) => StatusCode::CONFLICT,
            CoordinatorError::Store(_) | CoordinatorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = FailureEnvelope {
            kind: self.kind(),
            reason: self.to_string(),
        };
        (status, Json(envelope)).into_response()
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
