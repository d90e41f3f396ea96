//! Runtime configuration
//!
//! Every setting has a default, so that an empty or missing configuration file
//! yields a usable configuration. Durations are expressed in milliseconds.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};


/// Top-level configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Background thread pool sizing
    pub pool: PoolConfig,

    /// Cached value expiration
    pub cache: CacheConfig,

    /// Network call wrapping
    pub network: NetworkConfig,

    /// Default timeout of blocking waits, in milliseconds (none if unset)
    pub execute_timeout: Option<u64>,
}
//
impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| {
            ConfigError::Read { path: path.to_owned(), source }
        })?;
        let config = toml::from_str(&text).map_err(|source| {
            warn!(?path, %source, "Failed to parse configuration");
            ConfigError::Parse { path: Some(path.to_owned()), source }
        })?;
        debug!(?path, "Loaded configuration");
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults if it is missing
    ///
    /// Unreadable or malformed files are still reported as errors.
    ///
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. })
                if source.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Default timeout of blocking waits
    pub fn execute_timeout(&self) -> Option<Duration> {
        self.execute_timeout.map(Duration::from_millis)
    }
}


/// Sizing of the background thread pool
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Threads which are kept alive even when idle
    pub core_size: usize,

    /// Upper bound on the number of threads
    pub max_size: usize,

    /// Time after which idle non-core threads retire, in milliseconds
    #[serde(rename = "keep_alive")]
    pub keep_alive_ms: u64,
}
//
impl PoolConfig {
    /// Idle time after which non-core threads retire
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}
//
impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { core_size: 2, max_size: 8, keep_alive_ms: 30_000 }
    }
}


/// Expiration of cached values
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached value stays valid, in milliseconds
    #[serde(rename = "validity")]
    pub validity_ms: u64,
}
//
impl CacheConfig {
    /// How long a cached value stays valid
    pub fn validity(&self) -> Duration {
        Duration::from_millis(self.validity_ms)
    }
}
//
impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { validity_ms: 60_000 }
    }
}


/// Wrapping of network calls into futures
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Attach a backtrace of the call site to network failures
    pub keep_error_source: bool,
}


/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    /// The configuration text is not valid
    #[error("failed to parse configuration: {source}")]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
}
