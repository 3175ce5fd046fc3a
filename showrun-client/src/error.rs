//! Error types for the showrun client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the showrun client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a lost claim race. Callers treat it as benign:
    /// someone else won, re-read state before trying other work.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::ApiError { status: 412, .. })
    }

    /// Check if this error is an invalid state transition
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_helpers() {
        assert!(ClientError::api_error(404, "gone").is_not_found());
        assert!(ClientError::api_error(412, "raced").is_precondition_failed());
        assert!(ClientError::api_error(409, "done").is_invalid_state());
        assert!(!ClientError::api_error(500, "boom").is_precondition_failed());
    }
}
