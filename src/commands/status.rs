use clap::Args;

use conceptsync_core::SyncOrchestrator;

use super::OutputFormat;
use crate::config::Config;
use crate::remote::DirectoryRemoteStore;

/// Show sync status
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl StatusCommand {
    pub async fn run(
        &self,
        engine: &SyncOrchestrator,
        remote: &DirectoryRemoteStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        engine.set_online(remote.is_reachable().await);
        let status = engine.status();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                println!("Remote:       {}", remote.root().display());
                println!(
                    "Auto-resolve: {}",
                    if config.sync.auto_resolve.value {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
                println!("{}", status);

                for conflict in &status.conflicts {
                    println!(
                        "  {}  {} (local v{}, remote v{})",
                        conflict.id,
                        conflict.document_id,
                        conflict.local_version,
                        conflict.remote_version
                    );
                }
            }
        }
        Ok(())
    }
}

/// List operations waiting to be synced
#[derive(Args)]
pub struct PendingCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl PendingCommand {
    pub fn run(&self, engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
        let ops = engine.pending_operations();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&ops)?);
            }
            OutputFormat::Text => {
                if ops.is_empty() {
                    println!("No pending operations.");
                    return Ok(());
                }
                for op in &ops {
                    println!("{}", op);
                }
                println!();
                println!("{} operation(s) pending", ops.len());
            }
        }
        Ok(())
    }
}
