//! Board server commands: `taskdeck serve` and `taskdeck init-db`.

use anyhow::Result;
use std::path::Path;

use taskdeck::board::server::{self, ServerConfig};

pub async fn cmd_serve(config: ServerConfig) -> Result<()> {
    server::start_server(config).await
}

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    server::open_database(db_path)?;
    tracing::info!(db = %db_path.display(), "database initialized");
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
