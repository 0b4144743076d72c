//! Server configuration, read from TOML and overridden from the environment.
//!
//! ```
//! use slotmatch::Config;
//! use std::time::Duration;
//!
//! let config = Config::from_toml_str(r#"
//!     database = "pairs.sqlite"
//!     solve_timeout_ms = 2500
//! "#).unwrap();
//!
//! assert_eq!(config.solve_timeout(), Some(Duration::from_millis(2500)));
//! assert_eq!(config.log_filter, "info");
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_ENV: &str = "SLOTMATCH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "slotmatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub listen: SocketAddr,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
    /// Deadline for a single web solve. Unset means no deadline.
    pub solve_timeout_ms: Option<u64>,
    pub max_cardinality: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from("slotmatch.sqlite"),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_filter: "info".to_owned(),
            solve_timeout_ms: None,
            max_cardinality: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Loads the file named by `SLOTMATCH_CONFIG` and applies the
    /// `SLOTMATCH_*` overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_owned());
        let mut config = Config::load(path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(database) = lookup("SLOTMATCH_DATABASE") {
            self.database = PathBuf::from(database);
        }
        if let Some(listen) = lookup("SLOTMATCH_LISTEN") {
            self.listen = listen.parse().map_err(|_| {
                ConfigError::Invalid(format!("SLOTMATCH_LISTEN={listen:?} is not a socket address"))
            })?;
        }
        if let Some(filter) = lookup("SLOTMATCH_LOG") {
            self.log_filter = filter;
        }
        Ok(())
    }

    pub fn solve_timeout(&self) -> Option<Duration> {
        self.solve_timeout_ms.map(Duration::from_millis)
    }
}
