//! User management: `taskdeck user`.

use anyhow::Result;
use std::path::Path;

use taskdeck::board::auth::{generate_token, hash_token};
use taskdeck::board::server::open_database;

use super::super::UserCommands;

pub fn cmd_user(db_path: &Path, command: &UserCommands) -> Result<()> {
    match command {
        UserCommands::Add { name, email, .. } => {
            let db = open_database(db_path)?;
            let token = generate_token();
            let user = db.create_user(name, email, &hash_token(&token))?;
            tracing::info!(user_id = %user.id, email = %user.email, "user created");

            println!("Created user {} <{}>", user.name, user.email);
            println!("  id:    {}", user.id);
            println!("  token: {}", token);
            println!();
            println!("The token is shown only once. Send it as 'Authorization: Bearer <token>'.");
        }
    }
    Ok(())
}
