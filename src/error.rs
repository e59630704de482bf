//! Service Error Taxonomy
//!
//! Every fallible operation in the index, dedup and dispatch layers returns
//! `ServiceError`. Worker-local failures never reach callers as errors: the
//! worker loop folds them into a `Failed` task result instead.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Invalid configuration or parameters (dimension, sigma, threshold...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing index file, dataset, or task.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Search or mutation attempted on a handle that was never built or loaded.
    #[error("Index not loaded")]
    NotLoaded,

    /// A lease is held by someone else.
    #[error("Lease busy: {0}")]
    LeaseBusy(String),

    /// A processor failed after exhausting its retries.
    #[error("Processing error: {0}")]
    Processing(String),

    /// The caller stopped waiting; the task itself may still complete.
    #[error("Task timeout: {0}")]
    TaskTimeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Stable machine-readable tag used in the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "configuration_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::DimensionMismatch { .. } => "dimension_mismatch",
            ServiceError::EmptyInput(_) => "empty_input",
            ServiceError::NotLoaded => "not_loaded",
            ServiceError::LeaseBusy(_) => "lease_busy",
            ServiceError::Processing(_) => "processing_error",
            ServiceError::TaskTimeout(_) => "task_timeout",
            ServiceError::Cancelled(_) => "cancelled",
            ServiceError::Io(_) => "io_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Configuration(_)
            | ServiceError::DimensionMismatch { .. }
            | ServiceError::EmptyInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) | ServiceError::NotLoaded => StatusCode::NOT_FOUND,
            ServiceError::TaskTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ServiceError::LeaseBusy(_) | ServiceError::Cancelled(_) => StatusCode::CONFLICT,
            ServiceError::Processing(_) | ServiceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Body returned at the HTTP boundary for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_map_to_bad_request() {
        assert_eq!(
            ServiceError::EmptyInput("no vectors".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::DimensionMismatch { expected: 4, actual: 3 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Configuration("dim".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_missing_resources_map_to_not_found() {
        assert_eq!(
            ServiceError::NotFound("7.index".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServiceError::NotLoaded.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_timeout_and_internal_errors() {
        assert_eq!(
            ServiceError::TaskTimeout("t-1".into()).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
        let io = ServiceError::from(std::io::Error::other("disk"));
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(io.kind(), "io_error");
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = ServiceError::DimensionMismatch { expected: 2048, actual: 512 };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 2048, got 512");
    }
}
