//! Compute error types.

use thiserror::Error;

/// Result type for compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Errors that can occur while driving the cloud provider.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Image family {family} could not be resolved: {reason}")]
    ImageUnavailable { family: String, reason: String },

    #[error("Operation {operation} failed with error(s): {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Instance {0} has no external address")]
    NoExternalAddress(String),

    #[error("Gave up waiting for operation {operation}: {reason}")]
    WaitExhausted { operation: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ComputeError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 => Self::AuthError(msg),
            403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(msg),
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthError(_) => Some(401),
            Self::PermissionDenied(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::RateLimited(_) => Some(429),
            Self::ServerError(status, _) => Some(*status),
            Self::RequestFailed(_) => Some(400),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        assert!(matches!(
            ComputeError::from_http_status(404, "missing"),
            ComputeError::NotFound(_)
        ));
        assert!(matches!(
            ComputeError::from_http_status(409, "exists"),
            ComputeError::RequestFailed(_)
        ));
        assert!(matches!(
            ComputeError::from_http_status(400, "bad"),
            ComputeError::RequestFailed(_)
        ));

        let err = ComputeError::from_http_status(503, "unavailable");
        assert!(matches!(err, ComputeError::ServerError(503, _)));
        assert_eq!(err.http_status(), Some(503));
    }

    #[test]
    fn test_operation_failed_message() {
        let err = ComputeError::OperationFailed {
            operation: "operation-1".into(),
            message: "quota exceeded, zone exhausted".into(),
        };
        assert_eq!(
            err.to_string(),
            "Operation operation-1 failed with error(s): quota exceeded, zone exhausted"
        );
        assert_eq!(err.http_status(), None);
    }
}
