//! Daemon configuration, loaded from a TOML file. Every field has a
//! default so a partial file works.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the game server's log file.
    pub log_file: PathBuf,
    /// Path to the sqlite database (created if missing).
    pub db_file: PathBuf,
    /// Game server address for the UDP control channel.
    pub server_ip: String,
    pub server_port: u16,
    /// Admin secret embedded in every control-channel command.
    pub rcon_secret: String,
    /// Seconds between roster status sweeps.
    pub sync_interval_secs: u64,
    /// Seconds between log polls.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            log_file: PathBuf::from("server.log"),
            db_file: PathBuf::from("duel_ratings.db"),
            server_ip: "127.0.0.1".to_string(),
            server_port: 29070,
            rcon_secret: String::new(),
            sync_interval_secs: 60,
            poll_interval_ms: 250,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }
}
