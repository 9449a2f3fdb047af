// sortline - vision-driven pick-and-sort agent
// Watches the relay's camera stream and sorts colored objects into slots

use clap::Parser;
use sortline_agent::{resolve_config, EventRouter, Overrides, VisionPipeline};
use sortline_cns::RuntimeContext;
use sortline_eye::NullDetector;
use sortline_link::{ChannelManager, WebSocketConnector};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sortline")]
#[command(about = "Vision-driven pick-and-sort agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short)]
    config: Option<String>,

    /// Relay websocket URL
    #[arg(long)]
    url: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Pause between reconnect attempts, in milliseconds
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Validate and print the effective configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides {
        url: cli.url.clone(),
        log_level: cli.log_level.clone(),
        reconnect_delay_ms: cli.reconnect_delay_ms,
    };

    let config = match resolve_config(cli.config.as_deref(), &overrides, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Starting sortline agent");

    let ctx = Arc::new(RuntimeContext::with_palette(
        config.vision.colors.iter().map(|c| c.name.as_str()),
    ));
    let connector = Arc::new(WebSocketConnector::new(config.link.connect_timeout()));
    let manager = Arc::new(ChannelManager::new(config.link.clone(), connector));
    let pipeline = Arc::new(VisionPipeline::new(
        &config,
        Arc::new(NullDetector),
        Arc::clone(&ctx),
        Arc::new(manager.handle()),
    ));
    let router = Arc::new(EventRouter::new(pipeline));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let link_task = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run(router, shutdown_rx).await }
    });

    wait_for_shutdown().await;
    let _ = shutdown_tx.send(true);

    match link_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Channel manager failed: {}", e),
        Err(e) => error!("Channel manager task panicked: {}", e),
    }

    let stats = manager.stats();
    info!(
        "Shut down after {} connection attempts, {} sessions. Total sorted: {:?}",
        stats.attempts,
        stats.sessions,
        ctx.counters()
    );
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
