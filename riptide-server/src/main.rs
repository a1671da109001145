//! # Riptide Server
//!
//! HTTP entry point for the Riptide audio extraction service: accepts
//! media URLs, queues them for audio extraction, and serves the produced
//! files until retention reclaims them.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use riptide_core::{
    Config, DiskGuard, JobQueue, RetentionCleaner, RetentionSweeper, WorkerContext, WorkerPool,
    extract::{MediaExtractor, ytdlp::YtDlpExtractor},
};
use riptide_server::{AppState, routes};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "riptide-server")]
#[command(about = "Audio extraction service with bounded queueing and retention")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "RIPTIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Download directory (overrides the config file)
    #[arg(long)]
    download_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(download_dir) = cli.download_dir {
        config.storage.download_dir = download_dir;
    }
    config
        .ensure_directories()
        .context("Failed to prepare the download directory")?;

    let config = Arc::new(config);

    let sweeper = Arc::new(RetentionSweeper::new(
        config.storage.download_dir.clone(),
        config.retention_max_age(),
        config.retention.max_files,
    ));
    let disk = Arc::new(DiskGuard::new(
        config.storage.download_dir.clone(),
        config.disk.max_used_percent,
    ));

    let queue = JobQueue::start(config.queue.capacity, config.status_ttl());
    let extractor: Arc<dyn MediaExtractor> = Arc::new(YtDlpExtractor::new(&config.extractor.bin));
    let workers = WorkerPool::spawn(
        config.limits.concurrency,
        WorkerContext::new(
            queue.clone(),
            extractor,
            sweeper.clone(),
            config.extract_options(),
            config.worker_limits(),
        ),
    );

    // Reclaim leftovers from a previous run, then keep sweeping on a timer.
    if let Err(e) = sweeper.sweep().await {
        warn!("startup retention sweep failed: {e:#}");
    }
    let cleaner =
        RetentionCleaner::new(sweeper.clone(), config.sweep_interval()).start();

    let state = AppState {
        config: config.clone(),
        queue,
        sweeper,
        disk,
    };

    let app: Router = routes::create_api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("riptide server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shutting down");
    cleaner.abort();
    workers.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }
}
