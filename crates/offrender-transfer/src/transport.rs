//! Orchestrator-side seam over the transfer protocol.

use std::path::Path;

use async_trait::async_trait;
use offrender_models::{Quality, RenderOutcome};

use crate::client::TransferClient;
use crate::error::TransferResult;
use crate::protocol::{WorkerPaths, DEFAULT_PORT};

/// Everything the pipeline asks of a worker.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn ready(&self) -> TransferResult<()>;

    async fn set_quality(&self, quality: Quality) -> TransferResult<()>;

    async fn upload(&self, scene: &Path) -> TransferResult<()>;

    /// Fetch the sentinel into `dest`; fails while it does not exist yet.
    async fn fetch_sentinel(&self, dest: &Path) -> TransferResult<()>;

    async fn download_output(&self, dest: &Path) -> TransferResult<()>;

    async fn render_status(&self) -> TransferResult<Option<RenderOutcome>>;

    /// Browser link to the current output.
    fn preview_url(&self) -> String;
}

#[async_trait]
impl WorkerTransport for TransferClient {
    async fn ready(&self) -> TransferResult<()> {
        TransferClient::ready(self).await
    }

    async fn set_quality(&self, quality: Quality) -> TransferResult<()> {
        TransferClient::set_quality(self, quality).await
    }

    async fn upload(&self, scene: &Path) -> TransferResult<()> {
        TransferClient::upload(self, scene).await
    }

    async fn fetch_sentinel(&self, dest: &Path) -> TransferResult<()> {
        let url = self.sentinel_url()?;
        self.download_file(&url, dest).await
    }

    async fn download_output(&self, dest: &Path) -> TransferResult<()> {
        TransferClient::download_output(self, dest).await
    }

    async fn render_status(&self) -> TransferResult<Option<RenderOutcome>> {
        TransferClient::render_status(self).await
    }

    fn preview_url(&self) -> String {
        self.output_url()
            .map(|url| url.to_string())
            .unwrap_or_else(|_| self.base_url().to_string())
    }
}

/// Opens a transport to a worker once its address is known.
pub trait WorkerConnector: Send + Sync {
    type Transport: WorkerTransport;

    fn connect(&self, address: &str) -> TransferResult<Self::Transport>;
}

/// Connector producing [`TransferClient`]s.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    pub port: u16,
    pub paths: WorkerPaths,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            paths: WorkerPaths::default(),
        }
    }
}

impl WorkerConnector for HttpConnector {
    type Transport = TransferClient;

    fn connect(&self, address: &str) -> TransferResult<TransferClient> {
        TransferClient::for_address(address, self.port, self.paths.clone())
    }
}
