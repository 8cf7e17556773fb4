//! Compute Engine control plane for offrender render nodes.
//!
//! This crate provides:
//! - A REST client for the instance and zonal operation endpoints
//! - Token caching for service-account authentication
//! - The [`NodeLifecycle`] controller that blocks on operations
//! - The boot-time provisioning script installed on every node

pub mod api;
pub mod bootstrap;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod token;
pub mod types;

pub use api::{ComputeApi, Placement};
pub use bootstrap::BootstrapConfig;
pub use client::{GceClient, GceConfig, DEFAULT_BASE_URL};
pub use error::{ComputeError, ComputeResult};
pub use lifecycle::{
    GceLifecycleFactory, LifecycleController, LifecycleFactory, LifecycleOptions, NodeLifecycle,
    NodeSpec,
};
pub use token::{StaticToken, TokenCache, TokenSource, COMPUTE_SCOPE};
pub use types::{Image, Instance, Operation, OperationStatus};
