//! Shared data models for offrender.
//!
//! This crate provides:
//! - The job configuration document and its validated, typed form
//! - Remote node identity and lifecycle state
//! - Render quality and engine selection
//! - Render outcome reports exchanged with the worker
//! - Poll policies used by every wait site

pub mod artifact;
pub mod error;
pub mod job;
pub mod node;
pub mod poll;
pub mod quality;

pub use artifact::{
    is_scene_file, timestamped_output_name, RenderOutcome, OUTPUT_EXTENSION, SCENE_EXTENSION,
};
pub use error::{ConfigError, ConfigResult};
pub use job::{append_node_name, write_template, JobDocument, RenderJobConfig, CONFIG_TEMPLATE};
pub use node::{NodeName, NodeState, RemoteNode};
pub use poll::{poll_until, Poll, PollError, PollPolicy, PollTick};
pub use quality::{Quality, RenderEngine};
