//! Idle shutdown watchdog.
//!
//! A node left running after the orchestrator went away keeps billing. The
//! watchdog powers it off once the worker directories and the render status
//! stayed untouched for the idle timeout.

use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use offrender_transfer::WorkerPaths;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::watcher::newest_modification;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub paths: WorkerPaths,
    /// Inactivity after which the node is powered off
    pub idle_timeout: Duration,
    /// Activity check interval
    pub check_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            paths: WorkerPaths::default(),
            idle_timeout: Duration::from_secs(120 * 60),
            check_interval: Duration::from_secs(60),
        }
    }
}

impl WatchdogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            paths: WorkerPaths::from_env(),
            idle_timeout: std::env::var("OFFRENDER_IDLE_SHUTDOWN_MINS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|mins: &u64| *mins > 0)
                .map(|mins| Duration::from_secs(mins * 60))
                .unwrap_or(defaults.idle_timeout),
            check_interval: std::env::var("OFFRENDER_IDLE_CHECK_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.check_interval),
        }
    }
}

/// Turns the machine off.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn power_off(&self) -> ExecutorResult<()>;
}

/// Powers off through systemd.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPower;

#[async_trait]
impl PowerControl for SystemPower {
    async fn power_off(&self) -> ExecutorResult<()> {
        let status = Command::new("systemctl").arg("poweroff").status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecutorError::process_failed(format!(
                "systemctl poweroff exited with {status}"
            )))
        }
    }
}

pub struct IdleWatchdog<P> {
    config: WatchdogConfig,
    power: P,
    started: SystemTime,
}

impl<P: PowerControl> IdleWatchdog<P> {
    pub fn new(config: WatchdogConfig, power: P) -> Self {
        Self {
            config,
            power,
            started: SystemTime::now(),
        }
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    /// Most recent worker activity, never earlier than the watchdog's start.
    pub async fn last_activity(&self) -> SystemTime {
        let paths = &self.config.paths;
        let mut latest = self.started;

        for dir in [&paths.inbox_dir, &paths.output_dir] {
            if let Some(modified) = newest_under(dir).await {
                latest = latest.max(modified);
            }
        }

        if let Ok(modified) = tokio::fs::metadata(&paths.status_file)
            .await
            .and_then(|metadata| metadata.modified())
        {
            latest = latest.max(modified);
        }

        latest
    }

    /// Whether nothing happened for the whole idle timeout.
    pub async fn is_idle(&self) -> bool {
        let last = self.last_activity().await;
        SystemTime::now()
            .duration_since(last)
            .map(|idle| idle >= self.config.idle_timeout)
            .unwrap_or(false)
    }

    /// Check for activity until shutdown, powering off once idle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ExecutorResult<()> {
        info!(
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Watching for idle node"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.is_idle().await {
                        warn!(
                            idle_timeout_secs = self.config.idle_timeout.as_secs(),
                            "Node idle, powering off"
                        );
                        self.power.power_off().await?;
                        return Ok(());
                    }
                }
            }
        }

        debug!("Idle watchdog stopped");
        Ok(())
    }
}

async fn newest_under(dir: &Path) -> Option<SystemTime> {
    match newest_modification(dir).await {
        Ok(modified) => modified,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Activity scan failed");
            None
        }
    }
}
