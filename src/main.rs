use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskdeck::config::{DEFAULT_CONFIG_FILE, TaskdeckConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(version, about = "Multi-user project and kanban task tracker")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Listen on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and exit
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Work with tasks on a running server
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user and print their API token
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Delete a task, with a window to undo
    Delete {
        /// Task id
        id: i64,

        /// API token of the acting user
        #[arg(long, env = "TASKDECK_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default taskdeck.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = TaskdeckConfig::load_or_default(&cli.config)?;
    config.apply_env()?;
    taskdeck::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { port, db_path, dev } => {
            let mut server = config.server.to_server_config();
            if let Some(port) = port {
                server.port = *port;
            }
            if let Some(path) = db_path {
                server.db_path = path.clone();
            }
            server.dev_mode |= *dev;
            cmd::cmd_serve(server).await?;
        }
        Commands::InitDb { db_path } => {
            let path = db_path.as_ref().unwrap_or(&config.server.db_path);
            cmd::cmd_init_db(path)?;
        }
        Commands::User { command } => {
            let UserCommands::Add { db_path, .. } = command;
            let path = db_path.as_ref().unwrap_or(&config.server.db_path);
            cmd::cmd_user(path, command)?;
        }
        Commands::Task { command } => {
            let TaskCommands::Delete { id, token } = command;
            cmd::cmd_task_delete(&config.client, *id, token).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
    }

    Ok(())
}
