//! Remote node identity and lifecycle state.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Prefix for every generated node name.
pub const NODE_NAME_PREFIX: &str = "offrender";

/// Token length for nodes created and destroyed within a single run.
pub const EPHEMERAL_TOKEN_LEN: usize = 4;

/// Token length for prepared nodes that outlive the run that created them.
pub const PREPARED_TOKEN_LEN: usize = 10;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Compute Engine instance name.
///
/// Names are lowercase, start with a letter, contain only `[a-z0-9-]`,
/// do not end with a hyphen and are at most 63 characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

impl NodeName {
    /// Generate a fresh name from a short random token.
    pub fn generate(token_len: usize) -> Self {
        let mut rng = rand::rng();
        let token: String = (0..token_len)
            .map(|_| TOKEN_CHARSET[rng.random_range(0..TOKEN_CHARSET.len())] as char)
            .collect();
        Self(format!("{}-{}", NODE_NAME_PREFIX, token))
    }

    /// Validate an existing name, e.g. one recorded in a job config.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 63
            && raw.starts_with(|c: char| c.is_ascii_lowercase())
            && !raw.ends_with('-')
            && raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ConfigError::invalid_value("name", raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.0
    }
}

/// Lifecycle state of a remote node as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Provisioning,
    Running,
    Stopped,
    Deleted,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Provisioning => "provisioning",
            NodeState::Running => "running",
            NodeState::Stopped => "stopped",
            NodeState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cloud virtual machine owned by a single orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub name: NodeName,
    /// External address, known only once the create/start operation is done
    pub address: Option<String>,
    pub state: NodeState,
}

impl RemoteNode {
    pub fn running(name: NodeName, address: impl Into<String>) -> Self {
        Self {
            name,
            address: Some(address.into()),
            state: NodeState::Running,
        }
    }
}
