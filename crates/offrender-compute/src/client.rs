//! Compute Engine REST API client.
//!
//! - Token caching with refresh margin
//! - HTTP client tuning (pooling, timeouts)
//! - One retry after an expired-token rejection
//! - Idempotent mutations via `requestId`
//! - Tracing span per request

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::api::{ComputeApi, Placement};
use crate::error::{ComputeError, ComputeResult};
use crate::token::{TokenCache, TokenSource};
use crate::types::{Image, Instance, Operation};

/// Public endpoint of the Compute Engine v1 API.
pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Compute client configuration.
#[derive(Debug, Clone)]
pub struct GceConfig {
    pub placement: Placement,
    /// API root, overridable for emulators and tests
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl GceConfig {
    pub fn new(placement: Placement) -> Self {
        Self {
            placement,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Build a config for `placement`, applying environment overrides.
    pub fn from_env(placement: Placement) -> Self {
        let defaults = Self::new(placement);

        let connect_timeout_secs: u64 = std::env::var("OFFRENDER_COMPUTE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let timeout_secs: u64 = std::env::var("OFFRENDER_COMPUTE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Self {
            base_url: std::env::var("OFFRENDER_COMPUTE_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.base_url),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            placement: defaults.placement,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Compute Engine REST API client.
#[derive(Clone)]
pub struct GceClient {
    http: Client,
    config: GceConfig,
    tokens: Arc<dyn TokenSource>,
}

impl GceClient {
    pub fn new(config: GceConfig, tokens: Arc<dyn TokenSource>) -> ComputeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("offrender-compute/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ComputeError::Network)?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// Create a client authenticated with a service account key file.
    pub fn from_credentials_file(config: GceConfig, path: &Path) -> ComputeResult<Self> {
        let tokens = TokenCache::from_credentials_file(path)?;
        Self::new(config, Arc::new(tokens))
    }

    pub fn config(&self) -> &GceConfig {
        &self.config
    }

    fn zone_url(&self) -> String {
        format!(
            "{}/projects/{}/zones/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.placement.project,
            self.config.placement.zone
        )
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/instances/{}", self.zone_url(), name)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Send a request and decode the JSON response.
    ///
    /// Mutations get a fresh `requestId` so the provider deduplicates the
    /// retry after a token refresh.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> ComputeResult<T> {
        let request_id = (method != Method::GET).then(|| Uuid::new_v4().to_string());

        let send = |token: String| {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(token);
            if let Some(id) = &request_id {
                request = request.query(&[("requestId", id)]);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }
            request.send()
        };

        self.execute_request(operation, async {
            let token = self.tokens.access_token().await?;
            let mut response = send(token).await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                let text = response.text().await.unwrap_or_default();
                if !Self::is_access_token_expired(&text) {
                    return Err(ComputeError::from_http_status(
                        401,
                        format!("{} failed: {}", url, text),
                    ));
                }
                self.tokens.invalidate().await;
                let token = self.tokens.access_token().await?;
                response = send(token).await?;
            }

            let status = response.status();
            if !status.is_success() {
                return Err(Self::handle_error_response(status, &url, response).await);
            }

            let text = response.text().await?;
            serde_json::from_str(&text).map_err(|e| {
                ComputeError::invalid_response(format!("{} returned unexpected body: {}", url, e))
            })
        })
        .await
    }

    async fn execute_request<T, F>(&self, operation: &str, fut: F) -> ComputeResult<T>
    where
        F: std::future::Future<Output = ComputeResult<T>>,
    {
        let span = info_span!(
            "compute_request",
            operation = %operation,
            zone = %self.config.placement.zone
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        debug!(
            operation,
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            "Compute request finished"
        );

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> ComputeError {
        let body = response.text().await.unwrap_or_default();
        ComputeError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl ComputeApi for GceClient {
    fn placement(&self) -> &Placement {
        &self.config.placement
    }

    async fn image_from_family(&self, project: &str, family: &str) -> ComputeResult<Image> {
        let url = format!(
            "{}/projects/{}/global/images/family/{}",
            self.config.base_url.trim_end_matches('/'),
            project,
            family
        );
        self.call("image_from_family", Method::GET, url, None).await
    }

    async fn insert_instance(&self, instance: &Instance) -> ComputeResult<Operation> {
        let url = format!("{}/instances", self.zone_url());
        let body = serde_json::to_value(instance)?;
        self.call("insert_instance", Method::POST, url, Some(body))
            .await
    }

    async fn start_instance(&self, name: &str) -> ComputeResult<Operation> {
        let url = format!("{}/start", self.instance_url(name));
        self.call("start_instance", Method::POST, url, None).await
    }

    async fn stop_instance(&self, name: &str) -> ComputeResult<Operation> {
        let url = format!("{}/stop", self.instance_url(name));
        self.call("stop_instance", Method::POST, url, None).await
    }

    async fn delete_instance(&self, name: &str) -> ComputeResult<Operation> {
        let url = self.instance_url(name);
        self.call("delete_instance", Method::DELETE, url, None).await
    }

    async fn get_instance(&self, name: &str) -> ComputeResult<Instance> {
        let url = self.instance_url(name);
        self.call("get_instance", Method::GET, url, None).await
    }

    async fn get_operation(&self, operation: &str) -> ComputeResult<Operation> {
        let url = format!("{}/operations/{}", self.zone_url(), operation);
        self.call("get_operation", Method::GET, url, None).await
    }
}
