//! HTTP client for the transfer protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use offrender_models::{Quality, RenderOutcome};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{TransferError, TransferResult};
use crate::protocol::{
    worker_base_url, WorkerPaths, REPLY_OK, ROUTE_DOWNLOAD, ROUTE_DOWNLOAD_OUTPUT, ROUTE_READY,
    ROUTE_SET_QUALITY, ROUTE_STATUS, ROUTE_UPLOAD, UPLOAD_FIELD,
};

/// Timeout for the small control requests (`/ready`, `/set_quality/`, `/status`).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one worker's transfer server.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: Client,
    base_url: Url,
    paths: WorkerPaths,
}

impl TransferClient {
    pub fn new(base_url: &str, paths: WorkerPaths) -> TransferResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransferError::InvalidAddress(format!("{}: {}", base_url, e)))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("offrender-transfer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            paths,
        })
    }

    /// Client for the worker at `address:port`.
    pub fn for_address(address: &str, port: u16, paths: WorkerPaths) -> TransferResult<Self> {
        Self::new(&worker_base_url(address, port), paths)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn route(&self, route: &str) -> TransferResult<Url> {
        self.base_url
            .join(route)
            .map_err(|e| TransferError::InvalidAddress(format!("{}: {}", route, e)))
    }

    /// URL downloading `remote_path` from the worker.
    pub fn file_url(&self, remote_path: &Path) -> TransferResult<Url> {
        let mut url = self.route(ROUTE_DOWNLOAD)?;
        url.query_pairs_mut()
            .append_pair("p", &remote_path.to_string_lossy());
        Ok(url)
    }

    /// URL of the completion sentinel.
    pub fn sentinel_url(&self) -> TransferResult<Url> {
        self.file_url(&self.paths.sentinel_path())
    }

    /// URL of the rendered output.
    pub fn output_url(&self) -> TransferResult<Url> {
        self.route(ROUTE_DOWNLOAD_OUTPUT)
    }

    /// Probe the liveness route.
    pub async fn ready(&self) -> TransferResult<()> {
        let url = self.route(ROUTE_READY)?;
        let response = self
            .http
            .get(url.clone())
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Self::expect_success(&url, response.status())?;
        let body = response.text().await.unwrap_or_default();
        debug!(body = %body, "Worker is ready");
        Ok(())
    }

    /// Persist the render quality on the worker.
    pub async fn set_quality(&self, quality: Quality) -> TransferResult<()> {
        let mut url = self.route(ROUTE_SET_QUALITY)?;
        url.query_pairs_mut().append_pair("q", quality.as_str());

        let response = self
            .http
            .get(url.clone())
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Self::expect_success(&url, response.status())?;
        Self::expect_ok(ROUTE_SET_QUALITY, response).await
    }

    /// Push a scene file into the worker's inbox.
    pub async fn upload(&self, scene: &Path) -> TransferResult<()> {
        let file_name = scene
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", scene.display()),
                ))
            })?;

        let file = tokio::fs::File::open(scene).await?;
        let len = file.metadata().await?.len();
        let part = Part::stream_with_length(Body::from(file), len).file_name(file_name.clone());
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = self.route(ROUTE_UPLOAD)?;
        info!(scene = %file_name, bytes = len, "Uploading scene");

        let response = self.http.post(url.clone()).multipart(form).send().await?;
        Self::expect_success(&url, response.status())?;
        Self::expect_ok(ROUTE_UPLOAD, response).await
    }

    /// Download `url` into `dest` unless `dest` already exists.
    ///
    /// An existing destination is success without any request. The body is
    /// streamed into a sibling `.part` file and renamed on completion, so a
    /// failed transfer never leaves `dest` behind.
    pub async fn download_file(&self, url: &Url, dest: &Path) -> TransferResult<()> {
        if tokio::fs::try_exists(dest).await? {
            debug!(dest = %dest.display(), "Destination exists, skipping download");
            return Ok(());
        }

        let mut response = self.http.get(url.clone()).send().await?;
        Self::expect_success(url, response.status())?;

        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let written = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, TransferError>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        debug!(url = %url, dest = %dest.display(), "Downloaded file");
        Ok(())
    }

    /// Download the rendered output into `dest`.
    pub async fn download_output(&self, dest: &Path) -> TransferResult<()> {
        let url = self.output_url()?;
        self.download_file(&url, dest).await
    }

    /// Fetch the last render outcome; `None` if nothing was rendered yet.
    pub async fn render_status(&self) -> TransferResult<Option<RenderOutcome>> {
        let url = self.route(ROUTE_STATUS)?;
        let response = self
            .http
            .get(url.clone())
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_success(&url, response.status())?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| TransferError::InvalidResponse(format!("{}: {}", url, e)))
    }

    fn expect_success(url: &Url, status: StatusCode) -> TransferResult<()> {
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn expect_ok(route: &str, response: reqwest::Response) -> TransferResult<()> {
        let body = response.text().await?;
        if body.trim() == REPLY_OK {
            Ok(())
        } else {
            Err(TransferError::unexpected_reply(route, body))
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_encodes_path() {
        let client =
            TransferClient::new("http://10.0.0.1:8089", WorkerPaths::default()).unwrap();
        let url = client.sentinel_url().unwrap();
        assert_eq!(url.path(), "/dl/");
        assert_eq!(
            url.query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("p".to_string(), "/tmp/offrender_in/done.txt".to_string()))
        );
        assert_eq!(client.output_url().unwrap().as_str(), "http://10.0.0.1:8089/dlv/");
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/done.txt")),
            PathBuf::from("/data/done.txt.part")
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            TransferClient::new("not a url", WorkerPaths::default()),
            Err(TransferError::InvalidAddress(_))
        ));
    }
}
