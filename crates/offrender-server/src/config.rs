//! Transfer server configuration.

use offrender_transfer::{WorkerPaths, DEFAULT_PORT};

/// Default upload limit, matching the largest scenes seen in practice.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10_000 << 20;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Worker-local directories and state files
    pub paths: WorkerPaths,
    /// Max request body size
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            paths: WorkerPaths::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("OFFRENDER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("OFFRENDER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            paths: WorkerPaths::from_env(),
            max_upload_bytes: std::env::var("OFFRENDER_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        }
    }
}
