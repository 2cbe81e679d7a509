//! tempo-worker - tempo analysis and render job worker
//!
//! Polls the shared job store, analyzes uploaded tracks for tempo and
//! renders time-stretched copies. Run several processes against the same
//! database to scale out; each runs one sequential poll loop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo_worker::config::{load_config, ConfigOverrides};
use tempo_worker::scheduler::{Scheduler, SchedulerSettings};
use tempo_worker::storage::LocalObjectStore;
use tempo_worker::tools::ProcessToolRunner;

/// Command-line arguments for tempo-worker
#[derive(Parser, Debug)]
#[command(name = "tempo-worker")]
#[command(about = "Tempo analysis and render job worker")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config dir>/tempo/worker.toml if present)
    #[arg(short, long, env = "TEMPO_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding the default database and object store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Job database file
    #[arg(short, long, env = "TEMPO_DATABASE")]
    database: Option<PathBuf>,

    /// Root folder of the object store
    #[arg(short, long, env = "TEMPO_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo_worker=info,tempo_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting tempo-worker");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built_at = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Build"
    );

    let config = load_config(ConfigOverrides {
        config_file: args.config,
        data_dir: args.data_dir,
        database: args.database,
        storage_root: args.storage_root,
    })
    .context("Failed to load configuration")?;

    info!("Database: {}", config.database.display());
    info!("Object store: {}", config.storage_root.display());

    let pool = tempo_common::db::init_database(&config.database)
        .await
        .context("Failed to open job database")?;

    std::fs::create_dir_all(&config.storage_root).with_context(|| {
        format!("Failed to create object store root {}", config.storage_root.display())
    })?;

    let mut scheduler = Scheduler::new(
        pool.clone(),
        Arc::new(ProcessToolRunner::new()),
        Arc::new(LocalObjectStore::new(config.storage_root.clone())),
        config.settings.engine_settings(),
        SchedulerSettings::from(&config.settings),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, finishing current job");
            shutdown.cancel();
        }
    });

    scheduler.run_until(shutdown).await;

    pool.close().await;
    info!("Worker shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
