//! Pipeline error types.

use offrender_compute::ComputeError;
use offrender_models::{ConfigError, NodeName};
use offrender_transfer::TransferError;
use thiserror::Error;

use crate::pipeline::Stage;

/// Where leftover render nodes can be removed by hand.
pub const CONSOLE_URL: &str = "https://console.cloud.google.com/compute/instances";

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cloud operation failed: {source}")]
    Cloud {
        node: Option<NodeName>,
        #[source]
        source: ComputeError,
    },

    #[error("Worker transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Gave up waiting during {stage}: {reason}")]
    WaitExhausted { stage: Stage, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure after the node was created; the node may still exist.
    #[error("{source}")]
    NodeLeftBehind {
        node: NodeName,
        #[source]
        source: Box<PipelineError>,
    },
}

impl From<ComputeError> for PipelineError {
    fn from(source: ComputeError) -> Self {
        Self::Cloud { node: None, source }
    }
}

impl PipelineError {
    pub fn cloud(node: &NodeName, source: ComputeError) -> Self {
        Self::Cloud {
            node: Some(node.clone()),
            source,
        }
    }

    /// Attach the node a failed run leaves behind.
    pub fn with_node(self, node: &NodeName) -> Self {
        if self.node().is_some() {
            return self;
        }
        Self::NodeLeftBehind {
            node: node.clone(),
            source: Box::new(self),
        }
    }

    /// Node that may need manual cleanup.
    pub fn node(&self) -> Option<&NodeName> {
        match self {
            Self::Cloud { node, .. } => node.as_ref(),
            Self::NodeLeftBehind { node, .. } => Some(node),
            _ => None,
        }
    }
}
