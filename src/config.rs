use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the booking backend, e.g. https://api.example.com/v1
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How often unobserved cache entries are swept
  #[serde(default = "default_gc_interval_secs")]
  pub gc_interval_secs: u64,
  /// Terminal event poll rate for the watch command
  #[serde(default = "default_tick_rate_ms")]
  pub tick_rate_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      gc_interval_secs: default_gc_interval_secs(),
      tick_rate_ms: default_tick_rate_ms(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_gc_interval_secs() -> u64 {
  60
}

fn default_tick_rate_ms() -> u64 {
  250
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl SyncConfig {
  pub fn gc_interval(&self) -> Duration {
    Duration::from_secs(self.gc_interval_secs.max(1))
  }

  pub fn tick_rate(&self) -> Duration {
    Duration::from_millis(self.tick_rate_ms.max(10))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./medbook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/medbook/config.yaml
  /// 4. ~/.config/medbook/config.yaml
  ///
  /// With no file at all, `MEDBOOK_API_URL` alone is enough to run.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::from_env()?,
    };

    if let Ok(url) = std::env::var("MEDBOOK_API_URL") {
      if !url.trim().is_empty() {
        config.api.url = url;
      }
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("medbook.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("medbook").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn from_env() -> Result<Self> {
    let url = std::env::var("MEDBOOK_API_URL").map_err(|_| {
      eyre!(
        "No configuration file found. Create one at ~/.config/medbook/config.yaml\n\
                 or set MEDBOOK_API_URL."
      )
    })?;

    Ok(Self {
      api: ApiConfig {
        url,
        timeout_secs: default_timeout_secs(),
      },
      sync: SyncConfig::default(),
    })
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.api.url).map_err(|e| eyre!("Invalid api.url '{}': {}", config.api.url, e))?;
    Ok(config)
  }
}
