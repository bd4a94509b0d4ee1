//! Configuration view and validation commands: `taskdeck config`.

use anyhow::Result;
use std::path::Path;

use taskdeck::config::TaskdeckConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: &TaskdeckConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskdeck Configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();

            println!("[server]");
            println!("  host = \"{}\"", config.server.host);
            println!("  port = {}", config.server.port);
            println!("  db_path = \"{}\"", config.server.db_path.display());
            println!("  dev_mode = {}", config.server.dev_mode);
            println!();
            println!("[client]");
            println!("  api_base_url = \"{}\"", config.client.api_base_url);
            println!("  undo_window_ms = {}", config.client.undo_window_ms);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", config.logging.level);
            println!("  format = \"{}\"", config.logging.format);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                anyhow::bail!("{} already exists", config_path.display());
            }
            TaskdeckConfig::default().save(config_path)?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
