use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a config file with the current values and create the data and
    /// remote directories
    Init {
        /// Overwrite an existing config file
        #[arg(long, short)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        println!("sync.remote_dir: {}", config.sync.remote_dir.value.display());
                        println!("  source: {}", config.sync.remote_dir.source);
                        println!();

                        println!(
                            "sync.lock_timeout_secs: {}",
                            config.sync.lock_timeout_secs.value
                        );
                        println!("  source: {}", config.sync.lock_timeout_secs.source);
                        println!();

                        println!("sync.auto_resolve: {}", config.sync.auto_resolve.value);
                        println!("  source: {}", config.sync.auto_resolve.source);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init { force } => {
                let path = config_path.unwrap_or_else(Config::default_config_path);
                if path.exists() && !force {
                    return Err(format!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    )
                    .into());
                }

                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, config.template())?;
                println!("Wrote {}", path.display());

                for dir in [&config.data_dir.value, &config.sync.remote_dir.value] {
                    std::fs::create_dir_all(dir)?;
                    println!("Created {}", dir.display());
                }
                Ok(())
            }
        }
    }
}
