use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cache::{DEFAULT_MEMORY_TTL, DEFAULT_PREFIX, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::network::MonitorConfig;
use crate::queue::ReplayPolicy;

pub const APP_NAME: &str = "storefront-offline";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the storefront API and the connectivity probe live on
  pub api_base_url: String,
  /// SQLite file for the durable cache and offline queue
  pub database_path: Option<PathBuf>,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub queue: QueueConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_base_url: "http://localhost:5173".to_string(),
      database_path: None,
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      queue: QueueConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace for durable cache keys
  pub prefix: String,
  pub default_ttl_secs: u64,
  pub memory_ttl_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
      default_ttl_secs: DEFAULT_TTL.as_secs(),
      memory_ttl_secs: DEFAULT_MEMORY_TTL.as_secs(),
      sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn memory_ttl(&self) -> Duration {
    Duration::from_secs(self.memory_ttl_secs)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub probe_path: String,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
  /// Initial platform state before the first probe
  pub assume_online: bool,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    let monitor = MonitorConfig::default();
    Self {
      probe_path: monitor.probe_url,
      probe_interval_secs: monitor.probe_interval.as_secs(),
      probe_timeout_secs: monitor.probe_timeout.as_secs(),
      assume_online: true,
    }
  }
}

impl From<&NetworkConfig> for MonitorConfig {
  fn from(config: &NetworkConfig) -> Self {
    MonitorConfig {
      probe_url: config.probe_path.clone(),
      probe_interval: Duration::from_secs(config.probe_interval_secs),
      probe_timeout: Duration::from_secs(config.probe_timeout_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub replay_timeout_secs: u64,
  /// Drop queued requests the server rejects with a 4xx instead of retrying
  pub drop_client_errors: bool,
}

impl Default for QueueConfig {
  fn default() -> Self {
    let policy = ReplayPolicy::default();
    Self {
      replay_timeout_secs: policy.timeout.as_secs(),
      drop_client_errors: policy.drop_client_errors,
    }
  }
}

impl From<&QueueConfig> for ReplayPolicy {
  fn from(config: &QueueConfig) -> Self {
    ReplayPolicy {
      timeout: Duration::from_secs(config.replay_timeout_secs),
      drop_client_errors: config.drop_client_errors,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// tracing-subscriber filter directive; RUST_LOG takes precedence
  pub filter: String,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storefront-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storefront-offline/config.yaml
  ///
  /// With no file anywhere, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from(format!("{}.yaml", APP_NAME));
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    info!(path = %path.display(), "loaded configuration");
    Ok(config)
  }

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Apply STOREFRONT_API_BASE_URL if set.
  fn with_env_overrides(self) -> Self {
    match std::env::var("STOREFRONT_API_BASE_URL") {
      Ok(url) if !url.trim().is_empty() => Config {
        api_base_url: url.trim().to_string(),
        ..self
      },
      _ => self,
    }
  }
}
