//! Browser-side collaborators: tab enumeration, content messaging, tab
//! lifecycle, and out-of-band page fetches.
//!
//! The resolution pipeline only talks to the browser through these traits, so
//! the same code drives a real extension host, the file-backed session used by
//! the CLI, and the in-memory fakes used in tests.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type TabId = i64;

/// Read-only view of one open tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSnapshot {
  #[serde(default)]
  pub id: Option<TabId>,
  #[serde(default)]
  pub url: Option<String>,
  /// The browser unloaded the page to save resources; no content script is alive.
  #[serde(default)]
  pub discarded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
  Loading,
  Complete,
}

/// Tab lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
  Created(TabId),
  Removed(TabId),
  Updated { tab: TabId, status: Option<TabStatus>, url: Option<String> },
}

impl TabEvent {
  /// The tab finished loading.
  pub fn is_load_complete(&self) -> bool {
    matches!(self, TabEvent::Updated { status: Some(TabStatus::Complete), .. })
  }
}

/// Runtime messages exchanged with content scripts and the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
  /// Ask a loaded page for its in-page duration reading.
  GetDuration,
  /// Popup request for an immediate, non-debounced aggregation.
  RefreshTotals,
}

/// Content-script answer to [`Message::GetDuration`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationReply {
  #[serde(default)]
  pub duration_seconds: Option<f64>,
}

#[async_trait]
pub trait Tabs: Send + Sync {
  /// All tabs whose URL matches any of the match patterns.
  async fn query(&self, patterns: &[String]) -> Result<Vec<TabSnapshot>>;

  /// Send [`Message::GetDuration`] to the tab's content script. A missing
  /// listener or a page that is not ready is an `Err`.
  async fn request_duration(&self, tab: TabId) -> Result<DurationReply>;

  /// Open a tab at `url`, optionally in the background.
  async fn create(&self, url: &str, active: bool) -> Result<TabId>;

  async fn remove(&self, tab: TabId) -> Result<()>;

  /// Lifecycle events from this point on.
  fn subscribe(&self) -> broadcast::Receiver<TabEvent>;
}

/// Out-of-band GET of a page's raw markup: no credentials, redirects
/// followed, HTTP cache bypassed. Non-success statuses are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
  async fn fetch_page(&self, url: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn message_wire_format() {
    assert_eq!(serde_json::to_value(Message::GetDuration).unwrap(), json!({"type": "getDuration"}));
    let parsed: Message = serde_json::from_value(json!({"type": "refreshTotals"})).unwrap();
    assert_eq!(parsed, Message::RefreshTotals);
  }

  #[test]
  fn reply_accepts_null_and_missing() {
    let null: DurationReply = serde_json::from_value(json!({"durationSeconds": null})).unwrap();
    assert_eq!(null.duration_seconds, None);
    let missing: DurationReply = serde_json::from_value(json!({})).unwrap();
    assert_eq!(missing.duration_seconds, None);
    let value: DurationReply = serde_json::from_value(json!({"durationSeconds": 212.5})).unwrap();
    assert_eq!(value.duration_seconds, Some(212.5));
  }

  #[test]
  fn snapshot_defaults() {
    let tab: TabSnapshot = serde_json::from_value(json!({"url": "https://youtu.be/a"})).unwrap();
    assert_eq!(tab, TabSnapshot { id: None, url: Some("https://youtu.be/a".into()), discarded: false });
  }

  #[test]
  fn load_complete_detection() {
    assert!(TabEvent::Updated { tab: 1, status: Some(TabStatus::Complete), url: None }.is_load_complete());
    assert!(!TabEvent::Updated { tab: 1, status: Some(TabStatus::Loading), url: None }.is_load_complete());
    assert!(!TabEvent::Created(1).is_load_complete());
  }
}
