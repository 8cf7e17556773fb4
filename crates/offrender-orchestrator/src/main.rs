//! `offrender` command line tool.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offrender_orchestrator::{cli, Cli, OrchestratorConfig, PipelineError, CONSOLE_URL};

#[tokio::main]
async fn main() {
    // Already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(node) = e
            .downcast_ref::<PipelineError>()
            .and_then(PipelineError::node)
        {
            eprintln!(
                "The render node '{}' may still be running. Delete it from {}",
                node, CONSOLE_URL
            );
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    cli::run(cli, config).await?;
    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "offrender=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    // stdout belongs to progress output
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}
