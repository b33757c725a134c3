use clap::{Args, Subcommand, ValueEnum};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

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
    /// Print the config file path
    Path,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
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

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("sync:");
                        println!(
                            "  server_url: {}",
                            config.sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        match config.sync.api_key.as_deref() {
                            Some(key) => {
                                println!("  api_key: {}...", &key[..key.len().min(8)])
                            }
                            None => println!("  api_key: (not set)"),
                        }
                        println!("  auto_sync: {}", config.sync.auto_sync);
                        println!("  sync_interval_secs: {}", config.sync.sync_interval_secs);
                        println!(
                            "  request_timeout_secs: {}",
                            config.sync.request_timeout_secs
                        );
                    }
                }
                Ok(())
            }
            ConfigSubcommand::Path => {
                let path = config
                    .config_file
                    .clone()
                    .unwrap_or_else(Config::default_config_path);
                println!("{}", path.display());
                Ok(())
            }
        }
    }
}
