//! # Roster Sync Daemon
//!
//! Long-running worker that keeps every configured SIS provider in sync.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Daemon                                      │
//! │                                                                         │
//! │  sync.toml ───► SyncConfig ───► SyncService ◄─── StaticProviderFactory │
//! │                                    ▲   ▲          (fixture adapters)    │
//! │                                    │   │                                │
//! │                   SyncScheduler ───┘   └─── JobProcessor                │
//! │                   (cron → queue)            (queue → run_sync)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! sync-daemon [--config <path>] [--check] [--once]
//!
//!   --config <path>  config file (default: platform config dir/sync.toml)
//!   --check          validate the configuration and exit
//!   --once           sync every enabled provider once and exit
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roster_db::{Database, DbConfig};
use roster_sync::{
    JobProcessor, MemoryProvider, StaticProviderFactory, SyncConfig, SyncScheduler, SyncService,
};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    check: bool,
    once: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().context("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--check" => parsed.check = true,
                "--once" => parsed.once = true,
                other => bail!("unknown argument '{}'", other),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    // Load configuration
    let config = SyncConfig::load(args.config).context("loading sync configuration")?;
    info!(
        instance_id = config.instance_id(),
        providers = config.providers.len(),
        database = %config.database.path.display(),
        "Configuration loaded"
    );
    if args.check {
        info!("Configuration is valid");
        return Ok(());
    }

    let factory = build_factory(&config)?;
    if factory.is_empty() {
        warn!("No provider adapters configured; the daemon will only drain existing jobs");
    }

    // Open the store
    let db = Database::new(db_config(&config))
        .await
        .context("opening roster database")?;

    let config = Arc::new(config);
    let service = Arc::new(SyncService::from_config(
        db.clone(),
        config.clone(),
        Arc::new(factory),
    ));

    if args.once {
        run_once(&service).await;
        db.close().await;
        return Ok(());
    }

    // Start workers
    let (processor, processor_handle) = JobProcessor::new(service.clone());
    let processor_task = tokio::spawn(processor.run());

    let scheduler = SyncScheduler::new(service.clone())
        .await
        .context("creating scheduler")?;
    scheduler.start().await.context("starting scheduler")?;

    info!("Sync daemon running");
    shutdown_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler did not stop cleanly");
    }
    if let Err(e) = processor_handle.shutdown().await {
        warn!(error = %e, "Job processor already stopped");
    }
    if let Err(e) = processor_task.await {
        error!(error = %e, "Job processor task failed");
    }

    db.close().await;
    info!("Sync daemon shutdown complete");
    Ok(())
}

fn db_config(config: &SyncConfig) -> DbConfig {
    if config.database.path.as_os_str() == ":memory:" {
        return DbConfig::in_memory();
    }
    if let Some(parent) = config.database.path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "Cannot create database directory");
        }
    }
    DbConfig::new(&config.database.path).max_connections(config.database.max_connections)
}

/// Registers a scripted adapter for every enabled provider with a fixture.
fn build_factory(config: &SyncConfig) -> anyhow::Result<StaticProviderFactory> {
    let mut factory = StaticProviderFactory::new();
    for provider in config.providers.iter().filter(|p| p.enabled) {
        let Some(fixture) = provider.fixture.as_deref() else {
            warn!(
                tenant_id = %provider.tenant_id,
                provider_id = %provider.provider_id,
                "No adapter for provider, skipping"
            );
            continue;
        };
        let adapter = MemoryProvider::from_fixture(fixture).with_context(|| {
            format!(
                "loading fixture for {}/{}",
                provider.tenant_id, provider.provider_id
            )
        })?;
        factory.register(
            provider.tenant_id.clone(),
            provider.provider_id.clone(),
            Arc::new(adapter),
        );
    }
    Ok(factory)
}

/// Runs each enabled provider once, in config order.
async fn run_once(service: &SyncService) {
    let providers: Vec<_> = service
        .config()
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| (p.tenant_id.clone(), p.provider_id.clone()))
        .collect();

    for (tenant_id, provider_id) in providers {
        match service.run_sync(&tenant_id, &provider_id, None, None).await {
            Ok(outcome) => info!(
                %tenant_id,
                %provider_id,
                status = %outcome.status,
                creates = outcome.stats.creates,
                updates = outcome.stats.updates,
                deletes = outcome.stats.deletes,
                errors = outcome.stats.errors,
                conflicts = outcome.stats.conflicts,
                "Provider synced"
            ),
            Err(e) => error!(%tenant_id, %provider_id, error = %e, "Provider sync failed"),
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
