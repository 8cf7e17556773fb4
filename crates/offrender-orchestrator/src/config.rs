//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use offrender_compute::BootstrapConfig;
use offrender_models::PollPolicy;

use crate::error::{PipelineError, PipelineResult};

/// Working directory name under `$HOME` when `OFFRENDER_HOME` is unset.
pub const DEFAULT_ROOT_DIR: &str = "offrender_data";

/// Default delay between two worker probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Working directory: job configs, credentials, scenes and outputs
    pub root: PathBuf,
    /// Delay between `/ready` probes
    pub ready_interval: Duration,
    /// Delay between sentinel probes
    pub render_interval: Duration,
    /// Give up on the worker after this long; unbounded when unset
    pub ready_deadline: Option<Duration>,
    /// Give up on the render after this long; unbounded when unset
    pub render_deadline: Option<Duration>,
    /// Provisioning script inputs, including the worker port
    pub bootstrap: BootstrapConfig,
}

impl OrchestratorConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready_interval: DEFAULT_POLL_INTERVAL,
            render_interval: DEFAULT_POLL_INTERVAL,
            ready_deadline: None,
            render_deadline: None,
            bootstrap: BootstrapConfig::default(),
        }
    }

    /// Load from `OFFRENDER_HOME`, `OFFRENDER_READY_POLL_SECS`,
    /// `OFFRENDER_RENDER_POLL_SECS`, `OFFRENDER_READY_TIMEOUT_SECS`,
    /// `OFFRENDER_RENDER_TIMEOUT_SECS` and `OFFRENDER_ARTIFACT_URL`.
    pub fn from_env() -> PipelineResult<Self> {
        let root = match std::env::var("OFFRENDER_HOME").ok().filter(|s| !s.is_empty()) {
            Some(home) => PathBuf::from(home),
            None => std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(DEFAULT_ROOT_DIR))
                .map_err(|_| {
                    PipelineError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "neither OFFRENDER_HOME nor HOME is set",
                    ))
                })?,
        };

        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
        };

        Ok(Self {
            ready_interval: secs("OFFRENDER_READY_POLL_SECS").unwrap_or(DEFAULT_POLL_INTERVAL),
            render_interval: secs("OFFRENDER_RENDER_POLL_SECS").unwrap_or(DEFAULT_POLL_INTERVAL),
            ready_deadline: secs("OFFRENDER_READY_TIMEOUT_SECS"),
            render_deadline: secs("OFFRENDER_RENDER_TIMEOUT_SECS"),
            bootstrap: BootstrapConfig::from_env(),
            ..Self::with_root(root)
        })
    }

    pub fn ready_policy(&self) -> PollPolicy {
        bounded(
            PollPolicy::every("worker_ready", self.ready_interval),
            self.ready_deadline,
        )
    }

    pub fn render_policy(&self) -> PollPolicy {
        bounded(
            PollPolicy::every("render_sentinel", self.render_interval),
            self.render_deadline,
        )
    }
}

fn bounded(policy: PollPolicy, deadline: Option<Duration>) -> PollPolicy {
    match deadline {
        Some(deadline) => policy.with_deadline(deadline),
        None => policy,
    }
}
