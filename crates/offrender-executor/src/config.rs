//! Executor configuration.

use std::time::Duration;

use offrender_transfer::WorkerPaths;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker-local directories and state files
    pub paths: WorkerPaths,
    /// Render binary name or path
    pub blender_bin: String,
    /// Pause between render exit and the completion sentinel
    pub settle_delay: Duration,
    /// Retry interval while the inbox does not exist
    pub inbox_retry: Duration,
    /// Inbox snapshot interval
    pub watch_interval: Duration,
    /// Maximum concurrent renders
    pub max_concurrent_renders: usize,
    /// Graceful shutdown timeout for in-flight renders
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            paths: WorkerPaths::default(),
            blender_bin: "blender".to_string(),
            settle_delay: Duration::from_secs(30),
            inbox_retry: Duration::from_secs(10),
            watch_interval: Duration::from_millis(100),
            max_concurrent_renders: 1,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            paths: WorkerPaths::from_env(),
            blender_bin: std::env::var("OFFRENDER_BLENDER_BIN")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.blender_bin),
            settle_delay: std::env::var("OFFRENDER_SETTLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle_delay),
            inbox_retry: std::env::var("OFFRENDER_INBOX_RETRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.inbox_retry),
            watch_interval: std::env::var("OFFRENDER_WATCH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.watch_interval),
            max_concurrent_renders: std::env::var("OFFRENDER_MAX_RENDERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_renders),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        for var in [
            "OFFRENDER_BLENDER_BIN",
            "OFFRENDER_SETTLE_SECS",
            "OFFRENDER_MAX_RENDERS",
            "OFFRENDER_WATCH_INTERVAL_MS",
        ] {
            std::env::remove_var(var);
        }

        let config = ExecutorConfig::from_env();
        assert_eq!(config.blender_bin, "blender");
        assert_eq!(config.settle_delay, Duration::from_secs(30));
        assert_eq!(config.watch_interval, Duration::from_millis(100));
        assert_eq!(config.max_concurrent_renders, 1);
    }

    #[test]
    #[serial]
    fn test_zero_renders_falls_back() {
        std::env::set_var("OFFRENDER_MAX_RENDERS", "0");
        std::env::set_var("OFFRENDER_SETTLE_SECS", "5");
        let config = ExecutorConfig::from_env();
        std::env::remove_var("OFFRENDER_MAX_RENDERS");
        std::env::remove_var("OFFRENDER_SETTLE_SECS");

        assert_eq!(config.max_concurrent_renders, 1);
        assert_eq!(config.settle_delay, Duration::from_secs(5));
    }
}
