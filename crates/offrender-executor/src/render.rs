//! Render invocation.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use chrono::Utc;
use offrender_models::{RenderEngine, RenderOutcome};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::command::{parse_frame, BlenderCommand};
use crate::error::{ExecutorError, ExecutorResult};

/// Runs one render to completion.
///
/// Implementations never fail: a binary that cannot be launched is reported
/// through [`RenderOutcome::launched`].
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, scene: &Path, output_dir: &Path, engine: RenderEngine) -> RenderOutcome;
}

/// Renderer spawning the Blender binary.
#[derive(Debug, Clone)]
pub struct BlenderRenderer {
    binary: String,
}

impl BlenderRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, cmd: &BlenderCommand) -> ExecutorResult<ExitStatus> {
        let binary = which::which(&self.binary)
            .map_err(|_| ExecutorError::BlenderNotFound(self.binary.clone()))?;

        let args = cmd.build_args();
        info!("Running render: {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::process_failed("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::process_failed("stderr not captured"))?;

        let stdout_task = tokio::spawn(log_output(stdout, false));
        let stderr_task = tokio::spawn(log_output(stderr, true));

        let status = child.wait().await?;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        Ok(status)
    }
}

#[async_trait]
impl Renderer for BlenderRenderer {
    async fn render(&self, scene: &Path, output_dir: &Path, engine: RenderEngine) -> RenderOutcome {
        let cmd = BlenderCommand::new(scene, output_dir, engine);

        let (launched, exit_code) = match self.run(&cmd).await {
            Ok(status) => {
                if status.success() {
                    info!(scene = %scene.display(), "Render finished");
                } else {
                    warn!(scene = %scene.display(), status = %status, "Render exited with failure");
                }
                (true, status.code())
            }
            Err(e) => {
                error!(scene = %scene.display(), error = %e, "Render could not be run");
                (false, None)
            }
        };

        RenderOutcome {
            scene: scene.display().to_string(),
            engine,
            launched,
            exit_code,
            finished_at: Utc::now(),
        }
    }
}

async fn log_output<R: AsyncRead + Unpin>(stream: R, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    let mut last_frame = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            debug!(target: "offrender_executor::render::stderr", "{}", line);
            continue;
        }

        match parse_frame(&line) {
            Some(frame) if last_frame != Some(frame) => {
                last_frame = Some(frame);
                info!(frame, "Rendering");
            }
            Some(_) => {}
            None => debug!("{}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_not_launched() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = BlenderRenderer::new("offrender-no-such-blender");

        let outcome = renderer
            .render(&dir.path().join("shot.blend"), dir.path(), RenderEngine::Eevee)
            .await;

        assert!(!outcome.launched);
        assert_eq!(outcome.exit_code, None);
        assert!(!outcome.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_reported() {
        // `false` ignores its arguments and exits with status 1
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = BlenderRenderer::new("false");

        let outcome = renderer
            .render(&dir.path().join("shot.blend"), dir.path(), RenderEngine::Cycles)
            .await;

        assert!(outcome.launched);
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.engine, RenderEngine::Cycles);
    }
}
