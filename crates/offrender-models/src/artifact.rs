//! Job artifacts and render outcome reports.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::RenderEngine;

/// Extension of scene files the executor picks up.
pub const SCENE_EXTENSION: &str = "blend";

/// Extension of the rendered media file (AVI JPEG container).
pub const OUTPUT_EXTENSION: &str = "avi";

/// Check whether a path names a scene file.
pub fn is_scene_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == SCENE_EXTENSION)
}

/// Local file name for a downloaded render, unique per run.
pub fn timestamped_output_name(now: DateTime<Utc>) -> String {
    format!("{}UTC.{}", now.format("%Y%m%dT%H%M%S"), OUTPUT_EXTENSION)
}

/// Result of one render invocation on the worker.
///
/// The completion sentinel is written regardless of this outcome; the
/// report only lets the orchestrator tell a clean render from a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutcome {
    /// Scene file that was rendered
    pub scene: String,
    pub engine: RenderEngine,
    /// False when the render binary could not be started at all
    pub launched: bool,
    /// Process exit code; `None` if killed by a signal or never launched
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
}

impl RenderOutcome {
    pub fn is_success(&self) -> bool {
        self.launched && self.exit_code == Some(0)
    }
}
