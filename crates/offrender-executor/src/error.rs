//! Executor error types.

use offrender_transfer::TransferError;
use thiserror::Error;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Render binary '{0}' not found")]
    BlenderNotFound(String),

    #[error("Render process failed: {0}")]
    ProcessFailed(String),

    #[error("Gave up waiting for the inbox: {0}")]
    InboxUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    pub fn process_failed(msg: impl Into<String>) -> Self {
        Self::ProcessFailed(msg.into())
    }
}
