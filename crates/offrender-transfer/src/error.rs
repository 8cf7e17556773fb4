//! Transfer error types.

use thiserror::Error;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("{route} answered '{body}'")]
    UnexpectedReply { route: String, body: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn unexpected_reply(route: impl Into<String>, body: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            route: route.into(),
            body: body.into(),
        }
    }

    /// True for failures a polling caller should treat as "not yet".
    pub fn is_not_ready(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 404 || *status >= 500,
            _ => false,
        }
    }
}
