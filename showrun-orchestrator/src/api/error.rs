//! API Error Handling
//!
//! Unified error types and conversion for API responses. Every service error
//! maps onto one of the five caller-visible codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::attribution::AttributionError;
use crate::service::scheduler::SchedulerError;
use crate::store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    NotFound(String),
    InvalidState(String),
    PreconditionFailed(String),
    Internal(String),
}

impl ApiError {
    /// The machine-readable error code returned to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InvalidState(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PreconditionFailed(msg) => (StatusCode::PRECONDITION_FAILED, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "code": code })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(format!("{:?}", err))
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            SchedulerError::NotFound(msg) => ApiError::NotFound(msg),
            SchedulerError::InvalidState(msg) => ApiError::InvalidState(msg),
            SchedulerError::PreconditionFailed(msg) => ApiError::PreconditionFailed(msg),
            SchedulerError::Store(err) => err.into(),
        }
    }
}

impl From<AttributionError> for ApiError {
    fn from(err: AttributionError) -> Self {
        match err {
            AttributionError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            AttributionError::Store(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::InvalidInput(String::new()).code(), "INVALID_INPUT");
        assert_eq!(ApiError::NotFound(String::new()).code(), "NOT_FOUND");
        assert_eq!(ApiError::InvalidState(String::new()).code(), "INVALID_STATE");
        assert_eq!(
            ApiError::PreconditionFailed(String::new()).code(),
            "PRECONDITION_FAILED"
        );
        assert_eq!(ApiError::Internal(String::new()).code(), "INTERNAL");
    }

    #[test]
    fn test_scheduler_errors_map_to_codes() {
        let err: ApiError = SchedulerError::PreconditionFailed("raced".to_string()).into();
        assert_eq!(err.code(), "PRECONDITION_FAILED");

        let err: ApiError = SchedulerError::Store(StoreError::Backend("down".to_string())).into();
        assert_eq!(err.code(), "INTERNAL");
    }
}
