//! Render executor for offrender workers.
//!
//! This crate provides:
//! - A polling inbox watcher with write debouncing
//! - The render command builder and process runner
//! - The dispatcher that renders scenes and writes the completion sentinel
//! - An idle watchdog that powers off abandoned nodes

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod render;
pub mod watchdog;
pub mod watcher;

pub use command::BlenderCommand;
pub use config::ExecutorConfig;
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{RenderContext, RenderExecutor};
pub use render::{BlenderRenderer, Renderer};
pub use watchdog::{IdleWatchdog, PowerControl, SystemPower, WatchdogConfig};
pub use watcher::{InboxWatcher, WatchEvent, WatchEventKind};
