//! Render executor binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offrender_executor::{BlenderRenderer, ExecutorConfig, RenderContext, RenderExecutor};
use offrender_transfer::FsStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "offrender=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting offrender-executor");

    let config = ExecutorConfig::from_env();
    info!("Executor config: {:?}", config);

    let store = Arc::new(FsStore::new(config.paths.clone()));
    let renderer = BlenderRenderer::new(config.blender_bin.clone());
    let executor = Arc::new(RenderExecutor::new(RenderContext::new(config, store, renderer)));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Executor shutdown complete");
}
