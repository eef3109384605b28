use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_EXPIRE_AFTER_SECS;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Records not refreshed within this many seconds are expired
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: u64,
    /// Background sweep interval; listing always sweeps first regardless
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/masterserver/servers.db")
}

fn default_expire_after() -> u64 {
    DEFAULT_EXPIRE_AFTER_SECS
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            expire_after_secs: default_expire_after(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
