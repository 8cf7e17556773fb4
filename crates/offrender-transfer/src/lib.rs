//! Job handoff protocol between the orchestrator and a render worker.
//!
//! This crate provides:
//! - The route table and worker-local path layout
//! - An HTTP client with idempotent downloads
//! - The [`WorkerTransport`] seam used by the pipeline
//! - The [`BlobStore`] holding the quality flag, sentinel and render outcome

pub mod client;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;

pub use client::TransferClient;
pub use error::{TransferError, TransferResult};
pub use protocol::{sanitize_file_name, worker_base_url, WorkerPaths, DEFAULT_PORT};
pub use store::{BlobStore, FsStore, MemoryStore, StoreKey};
pub use transport::{HttpConnector, WorkerConnector, WorkerTransport};
