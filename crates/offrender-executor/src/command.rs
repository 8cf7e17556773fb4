//! Render command builder.

use std::path::{Path, PathBuf};

use offrender_models::RenderEngine;

/// Output container and codec passed to `-F`.
pub const DEFAULT_OUTPUT_FORMAT: &str = "AVIJPEG";

/// Builder for background animation renders.
#[derive(Debug, Clone)]
pub struct BlenderCommand {
    /// Scene file
    scene: PathBuf,
    /// Directory the frames or movie are written to
    output_dir: PathBuf,
    engine: RenderEngine,
}

impl BlenderCommand {
    pub fn new(scene: impl AsRef<Path>, output_dir: impl AsRef<Path>, engine: RenderEngine) -> Self {
        Self {
            scene: scene.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            engine,
        }
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        // A trailing slash makes the render binary treat the path as a directory prefix
        let output = format!(
            "{}/",
            self.output_dir.to_string_lossy().trim_end_matches('/')
        );

        vec![
            "-b".to_string(),
            self.scene.to_string_lossy().to_string(),
            "-o".to_string(),
            output,
            "-E".to_string(),
            self.engine.as_arg().to_string(),
            "-F".to_string(),
            DEFAULT_OUTPUT_FORMAT.to_string(),
            "-a".to_string(),
        ]
    }
}

/// Frame number from a render progress line such as `Fra:12 Mem:...`.
pub fn parse_frame(line: &str) -> Option<u32> {
    let rest = line.trim_start().strip_prefix("Fra:")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
