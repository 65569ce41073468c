use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_NAME: &str = "tabtime";

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Directory holding the duration cache and summary blobs.
  pub store_dir: Option<PathBuf>,
  /// User agent for background page fetches.
  pub user_agent: Option<String>,
  /// Seconds between session file polls in `watch`.
  pub watch_interval_secs: Option<u64>,
}

fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", APP_NAME)
}

impl Config {
  pub fn load() -> Self {
    if let Some(proj_dirs) = project_dirs() {
      let config_file = proj_dirs.config_dir().join("prefs.toml");
      if let Ok(content) = std::fs::read_to_string(config_file)
        && let Ok(config) = toml::from_str(&content)
      {
        return config;
      }
    }
    Self::default()
  }

  pub fn save(&self) {
    if let Some(proj_dirs) = project_dirs() {
      let config_dir = proj_dirs.config_dir();
      if std::fs::create_dir_all(config_dir).is_ok() {
        let config_file = config_dir.join("prefs.toml");
        if let Ok(content) = toml::to_string(self) {
          let _ = std::fs::write(config_file, content);
        }
      }
    }
  }

  /// Configured store directory, else the platform data directory, else `./.tabtime`.
  pub fn store_dir(&self) -> PathBuf {
    self.store_dir.clone().unwrap_or_else(default_data_dir)
  }

  pub fn watch_interval_secs(&self) -> u64 {
    self.watch_interval_secs.filter(|s| *s > 0).unwrap_or(2)
  }
}

pub fn default_data_dir() -> PathBuf {
  project_dirs().map(|d| d.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from(".tabtime"))
}

/// Where log files go.
pub fn log_dir() -> PathBuf {
  default_data_dir().join("logs")
}
