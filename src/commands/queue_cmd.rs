//! Queue inspection and maintenance commands.

use clap::{Args, Subcommand};
use serde_json::Value;

use crate::config::Config;
use crate::db::OperationStore;
use crate::models::{EntityKind, OperationKind, PendingOperation};
use crate::sync::{
    HttpRemoteStore, RemoteError, SyncCoordinator, SyncError, SyncOutcome, SyncRepository,
    WriteOutcome, MAX_RETRY_COUNT,
};

/// Inspect and manage the pending-operation queue
#[derive(Debug, Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    command: QueueSubcommand,
}

#[derive(Debug, Subcommand)]
enum QueueSubcommand {
    /// List queued operations in replay order
    List,
    /// Show the number of queued operations
    Count,
    /// Record an operation for later replay
    Add {
        /// Operation kind: create, update or delete
        #[arg(long)]
        kind: OperationKind,
        /// Entity kind: announcement, user, daily_record or attachment
        #[arg(long)]
        entity: EntityKind,
        /// Remote document id
        #[arg(long)]
        id: String,
        /// JSON document body (required for create and update)
        #[arg(long)]
        data: Option<String>,
        /// Apply immediately when the server is reachable, queue otherwise
        #[arg(long)]
        direct: bool,
    },
    /// Drop operations that exceeded the retry cap
    Purge,
}

impl QueueCommand {
    pub async fn run(
        &self,
        store: OperationStore,
        config: &Config,
    ) -> Result<(), QueueCommandError> {
        match &self.command {
            QueueSubcommand::List => self.list(&store).await,
            QueueSubcommand::Count => {
                println!("{}", store.count().await?);
                Ok(())
            }
            QueueSubcommand::Add {
                kind,
                entity,
                id,
                data,
                direct,
            } => {
                self.add(store, config, *kind, *entity, id, data.as_deref(), *direct)
                    .await
            }
            QueueSubcommand::Purge => self.purge(&store).await,
        }
    }

    async fn list(&self, store: &OperationStore) -> Result<(), QueueCommandError> {
        let pending = store.list_pending().await?;

        if pending.is_empty() {
            println!("Queue is empty.");
            return Ok(());
        }

        for op in &pending {
            let retries = if op.retry_count > 0 {
                format!("  (retries: {})", op.retry_count)
            } else {
                String::new()
            };
            println!(
                "{}  {}{}",
                op.created_at.format("%Y-%m-%d %H:%M"),
                op,
                retries
            );
            if let Some(error) = &op.last_error {
                println!("    last error: {}", error);
            }
        }
        println!();
        println!("{} operation(s) queued.", pending.len());

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn add(
        &self,
        store: OperationStore,
        config: &Config,
        kind: OperationKind,
        entity: EntityKind,
        id: &str,
        data: Option<&str>,
        direct: bool,
    ) -> Result<(), QueueCommandError> {
        let payload = match data {
            Some(data) => serde_json::from_str(data)?,
            None if kind == OperationKind::Delete => Value::Null,
            None => return Err(QueueCommandError::MissingData),
        };

        let op = PendingOperation::new(kind, entity, id, payload);

        if direct && config.sync.is_configured() {
            let remote = HttpRemoteStore::from_config(&config.sync)?;
            let repository = SyncRepository::new(store, remote);
            match repository.apply_or_enqueue(op).await? {
                WriteOutcome::Applied => println!("Applied directly."),
                WriteOutcome::Deferred => {
                    println!("Server unreachable; operation queued.")
                }
            }
            return Ok(());
        }

        store.enqueue(&op).await?;
        println!("Queued {}.", op);

        // Kick a sync right away when the config asks for it
        if config.sync.auto_sync && config.sync.is_configured() {
            let remote = HttpRemoteStore::from_config(&config.sync)?;
            let repository = SyncRepository::new(store, remote);
            let coordinator = SyncCoordinator::new(repository);
            match coordinator.sync_now().await {
                SyncOutcome::Finished(summary) if summary.failed == 0 => {
                    println!("Auto-sync: {} applied", summary.succeeded);
                }
                SyncOutcome::Finished(summary) => {
                    println!(
                        "Auto-sync: {} applied, {} still queued",
                        summary.succeeded, summary.remaining
                    );
                }
                SyncOutcome::Failed(_) => {
                    println!("Auto-sync: server unreachable, will retry later");
                }
                SyncOutcome::Skipped => {}
            }
        }

        Ok(())
    }

    async fn purge(&self, store: &OperationStore) -> Result<(), QueueCommandError> {
        let abandoned = store.list_abandoned(MAX_RETRY_COUNT).await?;

        if abandoned.is_empty() {
            println!("No abandoned operations.");
            return Ok(());
        }

        for op in &abandoned {
            println!("Dropping {}  (retries: {})", op, op.retry_count);
        }

        let purged = store.purge_abandoned(MAX_RETRY_COUNT).await?;
        println!();
        println!("Dropped {} abandoned operation(s).", purged);

        Ok(())
    }
}

/// Errors from queue commands
#[derive(Debug)]
pub enum QueueCommandError {
    Store(sqlx::Error),
    InvalidPayload(serde_json::Error),
    /// create/update operations need a document body
    MissingData,
    Remote(RemoteError),
    Sync(SyncError),
}

impl std::fmt::Display for QueueCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueCommandError::Store(e) => write!(f, "Queue storage error: {}", e),
            QueueCommandError::InvalidPayload(e) => {
                write!(f, "Invalid JSON in --data: {}", e)
            }
            QueueCommandError::MissingData => {
                write!(f, "create and update operations require --data")
            }
            QueueCommandError::Remote(e) => write!(f, "{}", e),
            QueueCommandError::Sync(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for QueueCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueCommandError::Store(e) => Some(e),
            QueueCommandError::InvalidPayload(e) => Some(e),
            QueueCommandError::MissingData => None,
            QueueCommandError::Remote(e) => Some(e),
            QueueCommandError::Sync(e) => Some(e),
        }
    }
}

impl From<sqlx::Error> for QueueCommandError {
    fn from(e: sqlx::Error) -> Self {
        QueueCommandError::Store(e)
    }
}

impl From<serde_json::Error> for QueueCommandError {
    fn from(e: serde_json::Error) -> Self {
        QueueCommandError::InvalidPayload(e)
    }
}

impl From<RemoteError> for QueueCommandError {
    fn from(e: RemoteError) -> Self {
        QueueCommandError::Remote(e)
    }
}

impl From<SyncError> for QueueCommandError {
    fn from(e: SyncError) -> Self {
        QueueCommandError::Sync(e)
    }
}
