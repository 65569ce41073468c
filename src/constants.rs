//! Tunables loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! with no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Tab enumeration
  pub tab_url_patterns: Vec<String>,

  // Debounce windows
  pub refresh_debounce_ms: u64,
  pub persist_debounce_ms: u64,

  // Temporary tab fallback
  pub temp_tab_timeout_ms: u64,

  // Storage keys
  pub cache_key: String,
  pub summary_key: String,

  // Background fetch
  pub fetch_timeout_secs: u64,
  pub user_agent: String,
}

impl Constants {
  pub fn refresh_debounce(&self) -> Duration {
    Duration::from_millis(self.refresh_debounce_ms)
  }

  pub fn persist_debounce(&self) -> Duration {
    Duration::from_millis(self.persist_debounce_ms)
  }

  pub fn temp_tab_timeout(&self) -> Duration {
    Duration::from_millis(self.temp_tab_timeout_ms)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed the first test run catches it.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
