//! Idle shutdown watchdog binary.

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offrender_executor::{IdleWatchdog, SystemPower, WatchdogConfig};

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

    info!("Starting offrender-watchdog");

    let config = WatchdogConfig::from_env();
    info!("Watchdog config: {:?}", config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let watchdog = IdleWatchdog::new(config, SystemPower);
    if let Err(e) = watchdog.run(shutdown_rx).await {
        error!("Watchdog error: {}", e);
        std::process::exit(1);
    }

    info!("Watchdog stopped");
}
