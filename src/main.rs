use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod remote;

use commands::{ConfigCommand, ConflictCommand, DocCommand, PendingCommand, StatusCommand, SyncCommand};
use conceptsync_core::{FileStore, SyncOrchestrator};
use config::Config;
use remote::DirectoryRemoteStore;

#[derive(Parser)]
#[command(name = "conceptsync")]
#[command(version)]
#[command(about = "Offline-first sync for concept map documents", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and edit documents (changes are queued for sync)
    Doc(DocCommand),

    /// Push queued changes to the remote copy
    Sync(SyncCommand),

    /// Show sync status
    Status(StatusCommand),

    /// List operations waiting to be synced
    Pending(PendingCommand),

    /// Inspect and resolve conflicts
    Conflicts(ConflictCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conceptsync=warn,conceptsync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.clone())?;

    match cli.command {
        Some(Commands::Doc(cmd)) => {
            let (engine, remote) = open_engine(&config)?;
            cmd.run(&engine, &remote).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let (engine, remote) = open_engine(&config)?;
            cmd.run(&engine, &remote).await?;
        }
        Some(Commands::Status(cmd)) => {
            let (engine, remote) = open_engine(&config)?;
            cmd.run(&engine, &remote, &config).await?;
        }
        Some(Commands::Pending(cmd)) => {
            let (engine, _) = open_engine(&config)?;
            cmd.run(&engine)?;
        }
        Some(Commands::Conflicts(cmd)) => {
            let (engine, _) = open_engine(&config)?;
            cmd.run(&engine)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config, cli.config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

fn open_engine(
    config: &Config,
) -> Result<(SyncOrchestrator, Arc<DirectoryRemoteStore>), Box<dyn std::error::Error>> {
    let remote = Arc::new(DirectoryRemoteStore::new(
        config.sync.remote_dir.value.clone(),
    ));
    let store = Arc::new(FileStore::new(config.data_dir.value.clone()));
    let engine = SyncOrchestrator::open(
        remote.clone(),
        store,
        config.orchestrator_config(),
    )?;
    Ok((engine, remote))
}
