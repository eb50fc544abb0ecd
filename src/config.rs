//! Layered service configuration.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. TOML file at `$MAILPOOL_CONFIG` (default `config.toml`)
//! 3. `MAILPOOL_*` environment variables, `__` separating sections
//!    (e.g. `MAILPOOL_POOL__LEASE_DURATION_SECS=300`)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const CONFIG_PATH_ENV: &str = "MAILPOOL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub pool: PoolConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub host: String,
    pub port: u16,
    pub loglevel: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            loglevel: "info".to_string(),
        }
    }
}

/// Lease and retention policy for the account pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Directory holding one `<stem>.json` file per account.
    pub accounts_dir: PathBuf,
    pub lease_duration_secs: u64,
    /// Period of the background retirement sweep.
    pub cleanup_interval_secs: u64,
    /// Retired records older than this are deleted.
    pub retention_hours: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            accounts_dir: PathBuf::from("data/oauth"),
            lease_duration_secs: 600,
            cleanup_interval_secs: 3600,
            retention_hours: 48.0,
        }
    }
}

impl PoolConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::try_from_secs_f64(self.retention_hours * 3600.0).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub base_url: Url,
    pub proxy: Option<Url>,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://oauth.882263.xyz").expect("static default url"),
            proxy: None,
            connect_timeout_secs: 5,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load from the default file location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MAILPOOL_").split("__"))
            .extract()
            .map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_str(toml_content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml_content))
            .extract()
            .map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.lease_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "pool.lease_duration_secs must be greater than zero".to_string(),
            ));
        }
        if self.pool.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pool.cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if !self.pool.retention_hours.is_finite() || self.pool.retention_hours < 0.0 {
            return Err(ConfigError::Invalid(
                "pool.retention_hours must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.basic.host, self.basic.port)
    }
}
