//! Sync CLI commands for replaying the pending-operation queue.

use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::OperationStore;
use crate::sync::{
    HttpRemoteStore, PeriodicTrigger, RemoteError, RemoteStore, SyncCoordinator, SyncError,
    SyncOutcome, SyncRepository,
};

/// Sync pending operations with the server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, queue depth and server status
    Status,
    /// Keep running, syncing on an interval until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(&self, store: OperationStore, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
            Some(SyncSubcommand::Watch) => self.watch(store, config).await,
        }
    }

    async fn sync(&self, store: OperationStore, config: &Config) -> Result<(), SyncCommandError> {
        let remote = HttpRemoteStore::from_config(&config.sync)?;
        let repository = SyncRepository::new(store, remote);
        let coordinator = SyncCoordinator::new(repository);

        let pending = coordinator.refresh().await?;
        if pending == 0 {
            println!("Nothing to sync.");
            return Ok(());
        }

        println!("Syncing {} pending operation(s)...", pending);
        println!();

        match coordinator.sync_now().await {
            SyncOutcome::Finished(summary) if summary.failed == 0 => {
                println!("  ✓ {} applied", summary.succeeded);
                println!();
                println!("Sync complete.");
                Ok(())
            }
            SyncOutcome::Finished(summary) => {
                println!("  ✓ {} applied", summary.succeeded);
                println!(
                    "  ✗ {} failed, {} still queued",
                    summary.failed, summary.remaining
                );
                Err(SyncCommandError::Partial {
                    failed: summary.failed,
                })
            }
            SyncOutcome::Failed(reason) => Err(SyncCommandError::Failed(reason)),
            // A fresh coordinator has no other run in flight
            SyncOutcome::Skipped => Ok(()),
        }
    }

    async fn status(&self, store: OperationStore, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let pending = store.count().await.map_err(SyncError::Store)?;

        if !config.sync.is_configured() {
            println!("Status: Not configured");
            println!("Queued: {} operation(s)", pending);
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  AULASYNC_SYNC_URL");
            println!("  AULASYNC_SYNC_API_KEY");
            return Ok(());
        }

        let server_url = config.sync.server_url.as_deref().unwrap_or_default();
        let api_key = config.sync.api_key.as_deref().unwrap_or_default();

        println!("Server:    {}", server_url);
        println!("API Key:   {}...", &api_key[..api_key.len().min(8)]);
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Interval:  {}s", config.sync.sync_interval_secs);
        println!("Queued:    {} operation(s)", pending);
        println!();

        print!("Server status: ");
        let remote = HttpRemoteStore::from_config(&config.sync)?;
        match remote.ping().await {
            Ok(()) => println!("✓ reachable"),
            Err(RemoteError::Unreachable(_)) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }

    async fn watch(&self, store: OperationStore, config: &Config) -> Result<(), SyncCommandError> {
        let remote = HttpRemoteStore::from_config(&config.sync)?;
        let repository = SyncRepository::new(store, remote);
        let coordinator = Arc::new(SyncCoordinator::new(repository));

        let interval = Duration::from_secs(config.sync.sync_interval_secs);
        println!(
            "Watching queue; syncing every {}s (Ctrl-C to stop)",
            interval.as_secs()
        );

        let trigger = PeriodicTrigger::spawn(coordinator.clone(), interval);
        let mut states = coordinator.subscribe();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    println!("  state: {}", state);
                }
            }
        }

        coordinator.stop();
        trigger.shutdown().await;
        println!();
        println!("Stopped.");
        Ok(())
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Remote(RemoteError),
    Sync(SyncError),
    /// Some operations failed and stay queued
    Partial { failed: usize },
    /// The whole run aborted
    Failed(String),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Remote(e) => write!(f, "{}", e),
            SyncCommandError::Sync(e) => write!(f, "{}", e),
            SyncCommandError::Partial { failed } => {
                write!(f, "{} operation(s) failed; run 'aulasync sync' to retry", failed)
            }
            SyncCommandError::Failed(reason) => write!(f, "Sync failed: {}", reason),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Remote(e) => Some(e),
            SyncCommandError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncCommandError {
    fn from(e: RemoteError) -> Self {
        SyncCommandError::Remote(e)
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::Sync(e)
    }
}
