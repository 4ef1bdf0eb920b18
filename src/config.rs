use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub board: BoardSettings,
  /// Directory for rolling log files (defaults to the data dir)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL, e.g. https://tasks.example.com/api
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// Lifetime of an entry before it is evicted
  pub ttl_secs: u64,
  /// Age after which an entry is served but refreshed
  pub stale_secs: u64,
  pub max_entries: usize,
  /// Keep a snapshot on disk for warm starts
  pub persist: bool,
  /// Snapshot database (defaults to $XDG_DATA_HOME/boardsync/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
  fn default() -> Self {
    let defaults = CacheConfig::default();
    Self {
      ttl_secs: defaults.default_ttl.as_secs(),
      stale_secs: defaults.stale_time.as_secs(),
      max_entries: defaults.max_entries,
      persist: true,
      path: None,
    }
  }
}

impl CacheSettings {
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      default_ttl: Duration::from_secs(self.ttl_secs),
      stale_time: Duration::from_secs(self.stale_secs),
      max_entries: self.max_entries,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardSettings {
  /// Board opened on start
  pub default_board: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./boardsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/boardsync/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/boardsync/config.yaml\n\
                 See boardsync.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("boardsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("boardsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from the environment.
  ///
  /// Checks BOARDSYNC_API_TOKEN.
  pub fn get_api_token() -> Result<String> {
    std::env::var("BOARDSYNC_API_TOKEN").map_err(|_| {
      eyre!("API token not found. Set the BOARDSYNC_API_TOKEN environment variable.")
    })
  }

  /// Directory for log files
  pub fn log_dir(&self) -> PathBuf {
    self.log_dir.clone().unwrap_or_else(|| {
      dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("boardsync")
        .join("logs")
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://tasks.example.com/api\n").unwrap();
    assert_eq!(config.api.url, "https://tasks.example.com/api");
    assert!(config.cache.persist);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.cache.stale_secs, 60);
    assert_eq!(config.cache.max_entries, 100);
    assert!(config.board.default_board.is_none());
  }

  #[test]
  fn test_cache_section_overrides() {
    let yaml = r#"
api:
  url: http://localhost:8080
cache:
  ttl_secs: 30
  persist: false
board:
  default_board: b7
log_dir: /tmp/boardsync-logs
"#;
    let config = Config::parse(yaml).unwrap();
    let cache = config.cache.cache_config();
    assert_eq!(cache.default_ttl, Duration::from_secs(30));
    assert_eq!(cache.stale_time, Duration::from_secs(60));
    assert!(!config.cache.persist);
    assert_eq!(config.board.default_board.as_deref(), Some("b7"));
    assert_eq!(config.log_dir(), PathBuf::from("/tmp/boardsync-logs"));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/boardsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
