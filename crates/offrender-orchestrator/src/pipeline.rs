//! Render pipeline.
//!
//! Every flow is one linear run of stages:
//!
//! ```text
//! Provisioning -> AwaitingReady -> Configuring -> Uploading
//!     -> Rendering -> Downloading -> Stopping/Deleting -> Done
//! ```
//!
//! Waits are fixed-interval polls. Transient worker errors are treated as
//! "not ready yet" and only logged at debug level; cloud errors abort the
//! run and report the node that may be left behind.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use offrender_compute::{
    ComputeError, GceLifecycleFactory, LifecycleFactory, NodeLifecycle, NodeSpec,
};
use offrender_models::node::{EPHEMERAL_TOKEN_LEN, PREPARED_TOKEN_LEN};
use offrender_models::{
    append_node_name, poll_until, timestamped_output_name, ConfigError, NodeName, Poll,
    PollError, Quality, RemoteNode, RenderJobConfig,
};
use offrender_transfer::protocol::SENTINEL_NAME;
use offrender_transfer::{HttpConnector, TransferError, WorkerConnector, WorkerPaths, WorkerTransport};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressSink;

/// Pipeline stage, reported to the progress sink on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Provisioning,
    AwaitingReady,
    Configuring,
    Uploading,
    Rendering,
    Downloading,
    Stopping,
    Deleting,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Provisioning => "provisioning",
            Stage::AwaitingReady => "awaiting_ready",
            Stage::Configuring => "configuring",
            Stage::Uploading => "uploading",
            Stage::Rendering => "rendering",
            Stage::Downloading => "downloading",
            Stage::Stopping => "stopping",
            Stage::Deleting => "deleting",
            Stage::Done => "done",
        }
    }

    /// Line printed when the stage begins, if any.
    pub fn banner(&self) -> Option<&'static str> {
        match self {
            Stage::Provisioning => Some("Launching render node..."),
            Stage::AwaitingReady => Some("Waiting for the render node to come up..."),
            Stage::Uploading => Some("Uploading scene..."),
            Stage::Rendering => Some("Rendering."),
            Stage::Downloading => Some("Rendered, now downloading."),
            Stage::Stopping => Some("Stopping render node..."),
            Stage::Deleting => Some("Deleting render node..."),
            Stage::Configuring | Stage::Done => None,
        }
    }

    pub fn waiting_label(&self) -> &'static str {
        match self {
            Stage::Rendering => "Been rendering",
            _ => "Been waiting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline against Compute Engine and the HTTP transfer protocol.
pub type GcePipeline<P> = Pipeline<GceLifecycleFactory, HttpConnector, P>;

/// Drives render flows against one node at a time.
pub struct Pipeline<F, C, P> {
    config: OrchestratorConfig,
    factory: F,
    connector: C,
    progress: P,
}

impl<P: ProgressSink> Pipeline<GceLifecycleFactory, HttpConnector, P> {
    /// Production wiring.
    pub fn gce(config: OrchestratorConfig, progress: P) -> Self {
        let connector = HttpConnector {
            port: config.bootstrap.port,
            paths: WorkerPaths::default(),
        };
        Self::new(config, GceLifecycleFactory::default(), connector, progress)
    }
}

impl<F, C, P> Pipeline<F, C, P>
where
    F: LifecycleFactory,
    C: WorkerConnector,
    P: ProgressSink,
{
    pub fn new(config: OrchestratorConfig, factory: F, connector: C, progress: P) -> Self {
        Self {
            config,
            factory,
            connector,
            progress,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Local copy of the completion sentinel.
    pub fn marker_path(&self) -> PathBuf {
        self.config.root.join(SENTINEL_NAME)
    }

    /// Create a node, render `scene` on it, download the output and delete
    /// the node. Returns the local output path.
    pub async fn render_ephemeral(&self, scene: &Path, job_path: &Path) -> PipelineResult<PathBuf> {
        check_scene(scene)?;
        let (job, credentials) = self.load_job(job_path)?;
        let lifecycle = self.factory.build(&job, &credentials)?;

        let node = self
            .provision(&lifecycle, &job, EPHEMERAL_TOKEN_LEN)
            .await?;

        let output = self
            .render_then_delete(&lifecycle, &node, &job, scene)
            .await
            .map_err(|e| e.with_node(&node.name))??;

        self.progress.stage(Stage::Done);
        Ok(output)
    }

    /// Create a node, push the quality flag, stop the node and record its
    /// name in the job config for later `render_prepared` runs.
    pub async fn prepare(&self, job_path: &Path) -> PipelineResult<NodeName> {
        let (job, credentials) = self.load_job(job_path)?;
        if let Some(existing) = &job.name {
            return Err(ConfigError::AlreadyPrepared(existing.to_string()).into());
        }
        let lifecycle = self.factory.build(&job, &credentials)?;

        let node = self.provision(&lifecycle, &job, PREPARED_TOKEN_LEN).await?;

        self.park(&lifecycle, &node, &job, job_path)
            .await
            .map_err(|e| e.with_node(&node.name))?;

        self.progress
            .info(&format!("Render node '{}' is prepared and stopped.", node.name));
        self.progress.stage(Stage::Done);
        Ok(node.name)
    }

    /// Start the prepared node, render `scene` on it and stop it again.
    pub async fn render_prepared(&self, scene: &Path, job_path: &Path) -> PipelineResult<PathBuf> {
        check_scene(scene)?;
        let (job, credentials) = self.load_job(job_path)?;
        let name = job.prepared_node()?.clone();
        let lifecycle = self.factory.build(&job, &credentials)?;

        self.progress.stage(Stage::Provisioning);
        let node = lifecycle
            .start(&name)
            .await
            .map_err(|e| PipelineError::cloud(&name, e))?;
        info!(node = %node.name, "Prepared render node started");

        let output = self
            .render_then_stop(&lifecycle, &node, scene)
            .await
            .map_err(|e| e.with_node(&node.name))??;

        self.progress.stage(Stage::Done);
        Ok(output)
    }

    /// Delete the prepared node and remove its job config.
    pub async fn teardown(&self, job_path: &Path) -> PipelineResult<NodeName> {
        let (job, credentials) = self.load_job(job_path)?;
        let name = job.prepared_node()?.clone();
        let lifecycle = self.factory.build(&job, &credentials)?;

        self.progress.stage(Stage::Deleting);
        lifecycle
            .delete(&name)
            .await
            .map_err(|e| PipelineError::cloud(&name, e))?;

        tokio::fs::remove_file(job_path).await?;
        self.progress.info(&format!(
            "Render node '{}' deleted and '{}' removed.",
            name,
            job_path.display()
        ));
        self.progress.stage(Stage::Done);
        Ok(name)
    }

    fn load_job(&self, job_path: &Path) -> PipelineResult<(RenderJobConfig, PathBuf)> {
        let job = RenderJobConfig::load(job_path)?;
        let credentials = job.credentials_path(&self.config.root)?;
        Ok((job, credentials))
    }

    async fn provision(
        &self,
        lifecycle: &F::Lifecycle,
        job: &RenderJobConfig,
        token_len: usize,
    ) -> PipelineResult<RemoteNode> {
        self.progress.stage(Stage::Provisioning);

        let spec = NodeSpec {
            name: NodeName::generate(token_len),
            machine_type: job.machine_type.clone(),
            startup_script: self.config.bootstrap.render(),
        };
        info!(node = %spec.name, machine_type = %spec.machine_type, "Creating render node");

        let node = lifecycle
            .create(&spec)
            .await
            .map_err(|e| PipelineError::cloud(&spec.name, e))?;

        self.progress.info(&format!(
            "Render node created. Name: {}, IP: {}",
            node.name,
            node.address.as_deref().unwrap_or("unknown")
        ));
        Ok(node)
    }

    /// The outer error means the node is left behind; the inner one is a
    /// failed download after the node was released.
    async fn render_then_delete(
        &self,
        lifecycle: &F::Lifecycle,
        node: &RemoteNode,
        job: &RenderJobConfig,
        scene: &Path,
    ) -> PipelineResult<PipelineResult<PathBuf>> {
        let transport = self.connect(node)?;
        self.await_ready(&transport).await?;
        self.configure(&transport, job.quality).await?;
        self.upload(&transport, scene).await?;
        self.await_render(&transport).await?;
        let output = self.download(&transport).await;

        self.progress.stage(Stage::Deleting);
        lifecycle
            .delete(&node.name)
            .await
            .map_err(|e| PipelineError::cloud(&node.name, e))?;
        self.progress.info("All done. Render node deleted.");

        Ok(output)
    }

    async fn render_then_stop(
        &self,
        lifecycle: &F::Lifecycle,
        node: &RemoteNode,
        scene: &Path,
    ) -> PipelineResult<PipelineResult<PathBuf>> {
        let transport = self.connect(node)?;
        self.await_ready(&transport).await?;
        self.upload(&transport, scene).await?;
        self.progress
            .info(&format!("Preview the render at {}", transport.preview_url()));
        self.await_render(&transport).await?;
        let output = self.download(&transport).await;

        self.progress.stage(Stage::Stopping);
        lifecycle
            .stop(&node.name)
            .await
            .map_err(|e| PipelineError::cloud(&node.name, e))?;
        self.progress.info("All done. Render node stopped.");

        Ok(output)
    }

    async fn park(
        &self,
        lifecycle: &F::Lifecycle,
        node: &RemoteNode,
        job: &RenderJobConfig,
        job_path: &Path,
    ) -> PipelineResult<()> {
        let transport = self.connect(node)?;
        self.await_ready(&transport).await?;
        self.configure(&transport, job.quality).await?;

        self.progress.stage(Stage::Stopping);
        lifecycle
            .stop(&node.name)
            .await
            .map_err(|e| PipelineError::cloud(&node.name, e))?;

        append_node_name(job_path, &node.name)?;
        Ok(())
    }

    fn connect(&self, node: &RemoteNode) -> PipelineResult<C::Transport> {
        let address = node.address.as_deref().ok_or_else(|| {
            PipelineError::cloud(
                &node.name,
                ComputeError::NoExternalAddress(node.name.to_string()),
            )
        })?;
        Ok(self.connector.connect(address)?)
    }

    async fn await_ready(&self, transport: &C::Transport) -> PipelineResult<()> {
        self.progress.stage(Stage::AwaitingReady);

        poll_until(
            &self.config.ready_policy(),
            || async move {
                match transport.ready().await {
                    Ok(()) => Ok::<_, TransferError>(Poll::Ready(())),
                    Err(e) => {
                        debug!(error = %e, "Render node not reachable yet");
                        Ok(Poll::Pending)
                    }
                }
            },
            |tick| self.progress.waiting(Stage::AwaitingReady, tick.elapsed),
        )
        .await
        .map_err(|e| wait_failed(Stage::AwaitingReady, e))?;

        self.progress.info("Tested connection to the render node.");
        Ok(())
    }

    async fn configure(&self, transport: &C::Transport, quality: Quality) -> PipelineResult<()> {
        self.progress.stage(Stage::Configuring);
        transport.set_quality(quality).await?;
        debug!(quality = %quality, "Quality flag set");
        Ok(())
    }

    async fn upload(&self, transport: &C::Transport, scene: &Path) -> PipelineResult<()> {
        self.progress.stage(Stage::Uploading);
        transport.upload(scene).await?;
        self.progress.info("Uploaded scene and beginning render.");
        Ok(())
    }

    async fn await_render(&self, transport: &C::Transport) -> PipelineResult<()> {
        let marker = self.marker_path();
        remove_if_exists(&marker).await?;

        self.progress.stage(Stage::Rendering);
        let marker = marker.as_path();

        poll_until(
            &self.config.render_policy(),
            || async move {
                match transport.fetch_sentinel(marker).await {
                    Ok(()) => Ok::<_, TransferError>(Poll::Ready(())),
                    Err(e) => {
                        debug!(error = %e, "Render not finished yet");
                        Ok(Poll::Pending)
                    }
                }
            },
            |tick| self.progress.waiting(Stage::Rendering, tick.elapsed),
        )
        .await
        .map_err(|e| wait_failed(Stage::Rendering, e))
    }

    async fn download(&self, transport: &C::Transport) -> PipelineResult<PathBuf> {
        self.progress.stage(Stage::Downloading);

        match transport.render_status().await {
            Ok(Some(outcome)) if !outcome.is_success() => {
                warn!(
                    scene = %outcome.scene,
                    launched = outcome.launched,
                    exit_code = ?outcome.exit_code,
                    "Render did not finish cleanly"
                );
                self.progress.info(&format!(
                    "Warning: the render did not finish cleanly (launched: {}, exit code: {}). The output may be incomplete.",
                    outcome.launched,
                    outcome
                        .exit_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ));
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Render outcome unavailable"),
        }

        let dest = self.config.root.join(timestamped_output_name(Utc::now()));
        transport.download_output(&dest).await?;
        remove_if_exists(&self.marker_path()).await?;

        self.progress.info(&format!("Output: {}", dest.display()));
        Ok(dest)
    }
}

fn check_scene(scene: &Path) -> PipelineResult<()> {
    if scene.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile(scene.to_path_buf()).into())
    }
}

fn wait_failed(stage: Stage, err: PollError<TransferError>) -> PipelineError {
    match err {
        PollError::Aborted(err) => PipelineError::Transfer(err),
        exhausted => PipelineError::WaitExhausted {
            stage,
            reason: exhausted.to_string(),
        },
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
