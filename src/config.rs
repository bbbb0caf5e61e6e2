//! Settings read from `~/.config/feedstore/config.toml`.
//!
//! Every key is optional. An absent or blank file means "all defaults".
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, relative paths taken from the config directory.
    pub database_path: Option<PathBuf>,

    /// 0 loads a feed without its news; 1 or more loads the news too.
    pub activation_depth: u32,

    /// Keep the id lists of newly created bins sorted.
    pub sorted_bins: bool,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            activation_depth: 1,
            sorted_bins: true,
            log_filter: "warn,feedstore=info".to_string(),
        }
    }
}

const SIZE_LIMIT: u64 = 64 * 1024;

const KEYS: &[&str] = &["database_path", "activation_depth", "sorted_bins", "log_filter"];

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if size > SIZE_LIMIT {
            return Err(ConfigError::TooLarge {
                size,
                limit: SIZE_LIMIT,
            });
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let table: toml::Table = text.parse()?;
        for key in table.keys().filter(|k| !KEYS.contains(&k.as_str())) {
            tracing::warn!(key = %key, path = %path.display(), "Ignoring unknown config key");
        }
        let config: Config = toml::Value::Table(table).try_into()?;
        tracing::debug!(path = %path.display(), ?config, "Loaded configuration");
        Ok(config)
    }

    /// The database file to open, resolved against `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) => config_dir.join(path),
            None => config_dir.join("feedstore.db"),
        }
    }
}
