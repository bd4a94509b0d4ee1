//! Configuration loaded from `taskdeck.toml`.
//!
//! Values are layered: file, then environment, then CLI flags (applied by
//! the command layer). A missing file means defaults.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".taskdeck/taskdeck.db"
//! dev_mode = false
//!
//! [client]
//! api_base_url = "http://127.0.0.1:3141/api"
//! undo_window_ms = 5000
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::board::server::ServerConfig;
use crate::undo::{DeleteUndoController, HttpTaskRemote, LocalBoard, Notifier};

pub const DEFAULT_CONFIG_FILE: &str = "taskdeck.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskdeck/taskdeck.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            db_path: self.db_path.clone(),
            dev_mode: self.dev_mode,
        }
    }
}

/// Settings for clients of the board API, including the undo controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_undo_window_ms")]
    pub undo_window_ms: u64,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3141/api".to_string()
}

fn default_undo_window_ms() -> u64 {
    5000
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            undo_window_ms: default_undo_window_ms(),
        }
    }
}

impl ClientSection {
    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn remote(&self, token: &str) -> HttpTaskRemote {
        HttpTaskRemote::new(self.api_base_url.as_str(), token)
    }

    /// A delete/undo controller against the configured API and window.
    pub fn controller(
        &self,
        board: LocalBoard,
        token: &str,
        notifier: Arc<dyn Notifier>,
    ) -> DeleteUndoController {
        DeleteUndoController::new(board, Arc::new(self.remote(token)), notifier)
            .with_window(self.undo_window())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskdeckConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskdeckConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskdeck.toml")
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize taskdeck.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `TASKDECK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `TASKDECK_*` overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("TASKDECK_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid TASKDECK_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("TASKDECK_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("TASKDECK_API_URL") {
            self.client.api_base_url = url;
        }
        if let Some(ms) = lookup("TASKDECK_UNDO_WINDOW_MS") {
            self.client.undo_window_ms = ms
                .parse()
                .with_context(|| format!("Invalid TASKDECK_UNDO_WINDOW_MS '{}'", ms))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if self.client.undo_window_ms == 0 {
            warnings.push(
                "client.undo_window_ms is 0: deletes commit immediately and cannot be undone"
                    .to_string(),
            );
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            warnings.push(format!(
                "Unknown logging.format '{}': expected 'pretty' or 'json'",
                self.logging.format
            ));
        }
        let url = &self.client.api_base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "client.api_base_url '{}' should start with http:// or https://",
                url
            ));
        }

        warnings
    }
}
