//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a job configuration.
///
/// All of these are fatal: the pipeline refuses to start and no remote
/// action is taken.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load job config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Every field in the job config is compulsory; missing: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("The file '{}' does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("Job config does not name a prepared node; run 'prep' first")]
    NotPrepared,

    #[error("Job config already names the prepared node '{0}'; run 'del' first")]
    AlreadyPrepared(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}
