//! Transfer protocol server for render workers.
//!
//! Receives scenes into the inbox, serves files and the render output,
//! persists the quality flag and reports the last render outcome.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use routes::create_router;
pub use state::AppState;
