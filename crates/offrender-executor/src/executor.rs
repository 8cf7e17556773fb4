//! Render dispatcher.
//!
//! `WaitingForInbox -> Watching -> Rendering -> Watching -> ...`: the watcher
//! feeds inbox events into a queue; scene files are rendered by a bounded
//! pool, and every render ends with the completion sentinel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use offrender_models::{is_scene_file, poll_until, Poll, PollError, PollPolicy, Quality, RenderOutcome};
use offrender_transfer::{BlobStore, StoreKey};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::render::Renderer;
use crate::watcher::{InboxWatcher, WatchEvent};

/// Capacity of the event queue between the watcher and the dispatcher.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// State shared by the dispatcher and every render task.
pub struct RenderContext<R> {
    pub config: ExecutorConfig,
    pub store: Arc<dyn BlobStore>,
    pub renderer: R,
}

impl<R: Renderer> RenderContext<R> {
    pub fn new(config: ExecutorConfig, store: Arc<dyn BlobStore>, renderer: R) -> Self {
        Self {
            config,
            store,
            renderer,
        }
    }

    /// Persisted quality, `Low` when unset or unreadable.
    pub async fn quality(&self) -> Quality {
        match self.store.try_get(StoreKey::Quality).await {
            Ok(Some(raw)) => Quality::from_flag(&raw),
            Ok(None) => Quality::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read quality flag, using default");
                Quality::default()
            }
        }
    }

    /// Render one scene and signal completion.
    ///
    /// The sentinel is written whatever the render's outcome; only a store
    /// failure keeps it from being written.
    pub async fn render_scene(&self, scene: &Path) -> ExecutorResult<RenderOutcome> {
        let output_dir = &self.config.paths.output_dir;
        reset_dir(output_dir).await?;

        let quality = self.quality().await;
        let engine = quality.engine();
        info!(
            scene = %scene.display(),
            quality = %quality,
            engine = %engine,
            "Rendering scene"
        );

        let outcome = self.renderer.render(scene, output_dir, engine).await;

        if let Err(e) = self
            .store
            .put(StoreKey::RenderStatus, &serde_json::to_vec(&outcome)?)
            .await
        {
            warn!(error = %e, "Failed to persist render outcome");
        }

        tokio::time::sleep(self.config.settle_delay).await;

        self.store.put(StoreKey::Sentinel, b"").await?;
        info!(
            scene = %scene.display(),
            success = outcome.is_success(),
            "Render complete, sentinel written"
        );

        Ok(outcome)
    }
}

/// Watches the inbox and dispatches renders.
pub struct RenderExecutor<R> {
    ctx: Arc<RenderContext<R>>,
    render_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl<R: Renderer + 'static> RenderExecutor<R> {
    pub fn new(ctx: RenderContext<R>) -> Self {
        let render_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_renders.max(1)));
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx: Arc::new(ctx),
            render_semaphore,
            shutdown,
        }
    }

    pub fn context(&self) -> &Arc<RenderContext<R>> {
        &self.ctx
    }

    /// Ask `run` to stop; in-flight renders are allowed to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Block until the inbox directory exists.
    pub async fn wait_for_inbox(&self) -> ExecutorResult<()> {
        let inbox = self.ctx.config.paths.inbox_dir.clone();
        let policy = PollPolicy::every("wait_for_inbox", self.ctx.config.inbox_retry);

        poll_until(
            &policy,
            || {
                let inbox = inbox.clone();
                async move {
                    Ok::<_, ExecutorError>(match tokio::fs::metadata(&inbox).await {
                        Ok(metadata) if metadata.is_dir() => Poll::Ready(()),
                        _ => Poll::Pending,
                    })
                }
            },
            |tick| {
                info!(
                    inbox = %inbox.display(),
                    attempt = tick.attempt,
                    "Inbox does not exist yet"
                );
            },
        )
        .await
        .map_err(|e| match e {
            PollError::Aborted(err) => err,
            exhausted => ExecutorError::InboxUnavailable(exhausted.to_string()),
        })
    }

    /// Run until shutdown.
    ///
    /// Scenes already in the inbox when `run` starts are not rendered;
    /// anything written after that, including while the inbox is still
    /// missing, is.
    pub async fn run(&self) -> ExecutorResult<()> {
        let started = SystemTime::now();
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(
            inbox = %self.ctx.config.paths.inbox_dir.display(),
            max_renders = self.ctx.config.max_concurrent_renders,
            "Starting render executor"
        );

        tokio::select! {
            result = self.wait_for_inbox() => result?,
            _ = shutdown_rx.changed() => {
                info!("Shutdown before inbox appeared");
                return Ok(());
            }
        }

        let (tx, mut rx) = mpsc::channel::<WatchEvent>(EVENT_QUEUE_CAPACITY);
        let watcher = InboxWatcher::new(
            self.ctx.config.paths.inbox_dir.clone(),
            self.ctx.config.watch_interval,
        )
        .since(started);
        let watcher_task = tokio::spawn(watcher.run(tx, self.shutdown.subscribe()));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        error!("Inbox watcher stopped unexpectedly");
                        break;
                    };
                    if is_scene_file(&event.path) {
                        self.dispatch(event.path);
                    }
                }
            }
        }

        watcher_task.abort();

        info!("Waiting for in-flight renders to complete...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_renders()).await;

        info!("Render executor stopped");
        Ok(())
    }

    /// Queue a render; it starts once a render slot is free.
    fn dispatch(&self, scene: PathBuf) {
        let semaphore = Arc::clone(&self.render_semaphore);
        let ctx = Arc::clone(&self.ctx);

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                warn!(scene = %scene.display(), "Render slots closed, scene dropped");
                return;
            };
            if let Err(e) = ctx.render_scene(&scene).await {
                error!(scene = %scene.display(), error = %e, "Render job failed");
            }
        });
    }

    async fn wait_for_renders(&self) {
        let total = self.ctx.config.max_concurrent_renders.max(1) as u32;
        let _ = self.render_semaphore.acquire_many(total).await;
    }
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}
