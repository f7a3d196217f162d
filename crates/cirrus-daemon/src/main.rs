//! Cirrus Daemon - background orchestration service
//!
//! This binary runs as a user service and handles:
//! - Supervision of every configured sync
//! - The local socket protocol for the presentation process
//! - Crash-loop detection and restart bookkeeping
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon opens the state store (fatal on failure), runs crash
//! recovery, binds the IPC socket, then hands the orchestrator to the
//! dispatch loop. The loop is controlled by a `CancellationToken`
//! triggered on receipt of SIGTERM, SIGINT or a Quit request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cirrus_core::domain::AppStateKey;
use cirrus_core::ports::LogOnlyTelemetry;
use cirrus_core::Config;
use cirrus_daemon::dispatch::Dispatcher;
use cirrus_daemon::log_sink::SpoolLogTransport;
use cirrus_daemon::orchestrator::Orchestrator;
use cirrus_daemon::maintenance;
use cirrus_daemon::watchdog::Watchdog;
use cirrus_ipc::CommServer;
use cirrus_jobs::JobPool;
use cirrus_store::{DatabasePool, SqliteStore};
use cirrus_sync::DefaultSupervisorFactory;
use cirrus_vfs::{DefaultProbe, DefaultVfsFactory};

#[derive(Parser, Debug)]
#[command(name = "cirrusd", version, about = "Cirrus background orchestration daemon")]
struct Cli {
    /// Ask the presentation process to open the settings window
    #[arg(long)]
    settings: bool,

    /// Ask the presentation process to open the synthesis window
    #[arg(long)]
    synthesis: bool,

    /// Wipe every sync's selective-sync node sets and exit
    #[arg(long = "clearSyncNodes")]
    clear_sync_nodes: bool,

    /// Delete every user's keyring entry and exit
    #[arg(long = "clearKeychainKeys")]
    clear_keychain_keys: bool,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(config_path = %config_path.display(), "Loaded configuration");

    // Store open failures are fatal: nothing below works without it.
    let pool = DatabasePool::new(&config.paths.db_file)
        .await
        .context("Failed to open database")?;
    let store = SqliteStore::new(pool.pool().clone());
    store
        .init_app_state()
        .await
        .context("Failed to initialize app state")?;

    if cli.clear_sync_nodes {
        maintenance::clear_sync_nodes(&store).await?;
        return Ok(());
    }
    if cli.clear_keychain_keys {
        maintenance::clear_keychain_keys(&store).await?;
        return Ok(());
    }

    ensure_app_uid(&store).await?;

    // Crash recovery runs before anything else. The marker file is left
    // behind by a run that did not shut down cleanly.
    let marker = config.paths.db_file.with_extension("running");
    let crash_recovered = marker.exists();
    if let Err(e) = std::fs::write(&marker, std::process::id().to_string()) {
        warn!(error = %e, "Running marker could not be written");
    }
    let watchdog = Watchdog::new(store.clone(), config.watchdog.restart_window_secs);
    match watchdog.handle_crash_recovery(crash_recovered).await {
        Ok(true) => {}
        Ok(false) => {
            let _ = std::fs::remove_file(&marker);
            anyhow::bail!("Crash loop detected; not restarting. Start manually to retry.");
        }
        Err(info) => {
            let _ = std::fs::remove_file(&marker);
            anyhow::bail!("Crash recovery failed: {info}");
        }
    }

    let (server, requests_rx) =
        CommServer::bind(&config.paths.socket_file).context("Failed to bind IPC socket")?;
    let signals = server.signals();

    let jobs = JobPool::new(config.jobs.pool_capacity);
    let probe = Arc::new(DefaultProbe::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(DefaultSupervisorFactory::new(
            store.clone(),
            Duration::from_secs(config.sync.tick_interval),
        )),
        Arc::new(DefaultVfsFactory::new(probe.clone())),
        probe,
        Arc::new(LogOnlyTelemetry),
        jobs,
        signals,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    tokio::spawn(server.run(shutdown.clone()));

    let transport = Arc::new(SpoolLogTransport::new(config.paths.log_dir.join("spool")));
    let mut dispatcher = Dispatcher::new(orchestrator, requests_rx, transport, &config, shutdown);
    if cli.settings {
        dispatcher.set_parameter("startup_window", "settings");
    } else if cli.synthesis {
        dispatcher.set_parameter("startup_window", "synthesis");
    }

    dispatcher.run().await;

    // A clean shutdown removes the marker; a crash leaves it for the next
    // run's recovery check.
    let _ = std::fs::remove_file(&marker);
    info!("Daemon exited cleanly");
    Ok(())
}

async fn ensure_app_uid(store: &SqliteStore) -> Result<()> {
    let current = store
        .app_state_value(AppStateKey::AppUid)
        .await
        .context("Failed to read app uid")?;
    if current.is_empty() {
        let uid = uuid::Uuid::new_v4().to_string();
        store
            .set_app_state_value(AppStateKey::AppUid, &uid)
            .await
            .context("Failed to persist app uid")?;
        info!(app_uid = %uid, "Generated installation identifier");
    }
    Ok(())
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}
