//! Server error types.
//!
//! The protocol only knows plain-text bodies, so every failure renders as
//! `not_ok` (or `not found`) with a matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use offrender_transfer::protocol::REPLY_NOT_OK;
use offrender_transfer::TransferError;
use thiserror::Error;
use tracing::warn;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Store(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }

        let body = match self {
            ServerError::NotFound(_) => "not found",
            _ => REPLY_NOT_OK,
        };
        (status, body).into_response()
    }
}
