use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aulasync::commands::{ConfigCommand, QueueCommand, SyncCommand};
use aulasync::config::Config;
use aulasync::db::{init_db, OperationStore};

#[derive(Parser)]
#[command(name = "aulasync")]
#[command(version)]
#[command(about = "Offline-first sync engine for the AulaSync school platform", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync pending operations with the server
    Sync(SyncCommand),

    /// Inspect and manage the pending-operation queue
    Queue(QueueCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Quiet by default; RUST_LOG surfaces the engine's tracing output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aulasync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            let store = OperationStore::new(pool);
            cmd.run(store, &config).await?;
        }
        Some(Commands::Queue(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            let store = OperationStore::new(pool);
            cmd.run(store, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
