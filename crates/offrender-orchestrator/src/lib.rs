//! Render pipeline driver for offrender.
//!
//! This crate provides:
//! - The pipeline that provisions a render node, ships the scene, waits for
//!   the render and brings the output back
//! - Progress reporting for the command line
//! - The `offrender` command line surface

pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;

pub use cli::{Cli, Command};
pub use config::OrchestratorConfig;
pub use error::{PipelineError, PipelineResult, CONSOLE_URL};
pub use pipeline::{GcePipeline, Pipeline, Stage};
pub use progress::{ConsoleProgress, ProgressSink};
