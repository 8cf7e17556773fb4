//! Transfer server routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use offrender_transfer::protocol::{
    ROUTE_DOWNLOAD, ROUTE_DOWNLOAD_OUTPUT, ROUTE_READY, ROUTE_SET_QUALITY, ROUTE_STATUS,
    ROUTE_UPLOAD,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{download, download_output, ready, set_quality, status, upload};
use crate::middleware::request_logging;
use crate::state::AppState;

/// Create the transfer router.
pub fn create_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .route(ROUTE_UPLOAD, post(upload))
        .route(ROUTE_DOWNLOAD, get(download))
        .route(ROUTE_DOWNLOAD_OUTPUT, get(download_output))
        .route(ROUTE_SET_QUALITY, get(set_quality))
        .route(ROUTE_READY, get(ready))
        .route(ROUTE_STATUS, get(status))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}
