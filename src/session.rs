//! File-backed tab source for running the pipeline outside a browser.
//!
//! A session file is a JSON array of tabs, as exported from the browser:
//!
//! ```json
//! [
//!   { "id": 12, "url": "https://www.youtube.com/watch?v=abc", "discarded": false, "durationSeconds": 212 },
//!   { "id": 13, "url": "https://youtu.be/xyz", "discarded": true }
//! ]
//! ```
//!
//! `durationSeconds`, when present, stands in for the tab's content-script
//! answer. A file session cannot open tabs, so the temp-tab fallback always
//! comes up empty here.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::browser::{DurationReply, TabEvent, TabId, TabSnapshot, TabStatus, Tabs};
use crate::video_url::matches_any_pattern;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionTab {
  #[serde(flatten)]
  snapshot: TabSnapshot,
  #[serde(default)]
  duration_seconds: Option<f64>,
}

pub struct SessionTabs {
  path: PathBuf,
  tabs: StdMutex<Vec<SessionTab>>,
  events: broadcast::Sender<TabEvent>,
}

async fn read_session(path: &Path) -> Result<Vec<SessionTab>> {
  let content =
    tokio::fs::read_to_string(path).await.with_context(|| format!("Failed to read session file {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("Malformed session file {}", path.display()))
}

/// Lifecycle events that turn `before` into `after`.
fn diff_events(before: &[SessionTab], after: &[SessionTab]) -> Vec<TabEvent> {
  let old: HashMap<TabId, &TabSnapshot> = before.iter().filter_map(|t| Some((t.snapshot.id?, &t.snapshot))).collect();
  let new: HashMap<TabId, &TabSnapshot> = after.iter().filter_map(|t| Some((t.snapshot.id?, &t.snapshot))).collect();

  let mut events = Vec::new();
  for tab in after {
    let Some(id) = tab.snapshot.id else { continue };
    let loaded = TabEvent::Updated { tab: id, status: Some(TabStatus::Complete), url: tab.snapshot.url.clone() };
    match old.get(&id) {
      None => {
        events.push(TabEvent::Created(id));
        events.push(loaded);
      }
      Some(prev) if prev.url != tab.snapshot.url || prev.discarded != tab.snapshot.discarded => events.push(loaded),
      Some(_) => {}
    }
  }
  let mut gone: Vec<TabId> = old.keys().filter(|id| !new.contains_key(id)).copied().collect();
  gone.sort_unstable();
  events.extend(gone.into_iter().map(TabEvent::Removed));
  events
}

impl SessionTabs {
  pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let tabs = read_session(&path).await?;
    info!(path = %path.display(), tabs = tabs.len(), "session: loaded");
    let (events, _) = broadcast::channel(256);
    Ok(Self { path, tabs: StdMutex::new(tabs), events })
  }

  /// A session with no tabs and no backing file.
  pub fn empty() -> Self {
    let (events, _) = broadcast::channel(1);
    Self { path: PathBuf::new(), tabs: StdMutex::default(), events }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Re-read the session file and broadcast the lifecycle events implied by
  /// the change. Returns the number of events sent.
  pub async fn reload(&self) -> Result<usize> {
    let fresh = read_session(&self.path).await?;
    let events = {
      let mut tabs = self.tabs();
      let events = diff_events(&tabs, &fresh);
      *tabs = fresh;
      events
    };

    for event in &events {
      debug!(event = ?event, "session: tab change");
      // No receivers just means nobody is watching.
      let _ = self.events.send(event.clone());
    }
    Ok(events.len())
  }

  fn tabs(&self) -> MutexGuard<'_, Vec<SessionTab>> {
    self.tabs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl Tabs for SessionTabs {
  async fn query(&self, patterns: &[String]) -> Result<Vec<TabSnapshot>> {
    Ok(
      self
        .tabs()
        .iter()
        .filter(|t| t.snapshot.url.as_deref().is_some_and(|url| matches_any_pattern(url, patterns)))
        .map(|t| t.snapshot.clone())
        .collect(),
    )
  }

  async fn request_duration(&self, tab: TabId) -> Result<DurationReply> {
    let tabs = self.tabs();
    let entry = tabs.iter().find(|t| t.snapshot.id == Some(tab)).ok_or_else(|| anyhow!("No tab with id {}", tab))?;
    if entry.snapshot.discarded {
      return Err(anyhow!("Tab {} is discarded; no content script is running", tab));
    }
    match entry.duration_seconds {
      Some(seconds) => Ok(DurationReply { duration_seconds: Some(seconds) }),
      None => Err(anyhow!("Tab {} has no content-script reading", tab)),
    }
  }

  async fn create(&self, url: &str, _active: bool) -> Result<TabId> {
    Err(anyhow!("A file session cannot open tabs (requested {})", url))
  }

  async fn remove(&self, tab: TabId) -> Result<()> {
    Err(anyhow!("A file session cannot close tabs (requested {})", tab))
  }

  fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
    self.events.subscribe()
  }
}
