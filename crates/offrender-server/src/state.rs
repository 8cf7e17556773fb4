//! Shared handler state.

use std::sync::Arc;

use offrender_transfer::{BlobStore, FsStore};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn BlobStore>,
}

impl AppState {
    /// State backed by the worker filesystem.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(FsStore::new(config.paths.clone()));
        Self::with_store(config, store)
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn BlobStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}
