//! Persistent per-video duration cache.
//!
//! Lives in memory, loaded once per process from a [`KeyValueStore`], and
//! written back after a quiet period so bursts of resolutions cost one write.
//! Entries never expire: a video's length does not change.

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::debounce::{Debounced, debounce};
use crate::store::KeyValueStore;
use crate::video_url::VideoId;

/// Which strategy learned a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DurationSource {
  ContentScript,
  BackgroundFetch,
  TempTab,
}

impl DurationSource {
  pub fn label(self) -> &'static str {
    match self {
      DurationSource::ContentScript => "content-script",
      DurationSource::BackgroundFetch => "background-fetch",
      DurationSource::TempTab => "temp-tab",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub duration_seconds: u64,
  pub source: DurationSource,
  /// Epoch milliseconds.
  pub updated_at: i64,
}

type EntryMap = HashMap<VideoId, CacheEntry>;
type PersistAction = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// State shared between the cache handle and its detached persist task.
struct Shared {
  store: Arc<dyn KeyValueStore>,
  key: String,
  entries: StdMutex<EntryMap>,
  loaded: OnceCell<()>,
  /// Held for the whole snapshot-and-write, so writes land in snapshot order.
  writes: AsyncMutex<()>,
}

pub struct DurationCache {
  shared: Arc<Shared>,
  persist: Debounced<PersistAction>,
}

fn lock(entries: &StdMutex<EntryMap>) -> MutexGuard<'_, EntryMap> {
  // Never held across an await; a poisoned map is still a consistent map.
  entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decode a stored blob entry by entry, so one bad record does not lose the rest.
fn decode_entries(value: Value) -> EntryMap {
  let Value::Object(map) = value else {
    warn!("cache: stored value is not an object, ignoring");
    return HashMap::new();
  };

  map
    .into_iter()
    .filter_map(|(id, raw)| match serde_json::from_value::<CacheEntry>(raw) {
      Ok(entry) if !id.is_empty() && entry.duration_seconds > 0 => Some((id, entry)),
      Ok(_) => {
        debug!(id = %id, "cache: dropping non-positive entry");
        None
      }
      Err(e) => {
        debug!(id = %id, err = %e, "cache: dropping malformed entry");
        None
      }
    })
    .collect()
}

impl Shared {
  async fn load(&self) {
    self
      .loaded
      .get_or_init(|| async {
        let stored = match self.store.get(&self.key).await {
          Ok(Some(value)) => decode_entries(value),
          Ok(None) => HashMap::new(),
          Err(e) => {
            warn!(err = %format!("{:#}", e), "cache: load failed, starting empty");
            HashMap::new()
          }
        };

        let mut entries = lock(&self.entries);
        let count = stored.len();
        // Anything put before the load finished is newer than the stored copy.
        for (id, entry) in stored {
          entries.entry(id).or_insert(entry);
        }
        info!(stored = count, total = entries.len(), "cache: loaded");
      })
      .await;
  }

  async fn write_back(&self) -> Result<usize> {
    // The stored blob is replaced whole; merge it in before overwriting it.
    self.load().await;

    let _turn = self.writes.lock().await;
    let snapshot: BTreeMap<VideoId, CacheEntry> =
      lock(&self.entries).iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let count = snapshot.len();
    let value = serde_json::to_value(&snapshot).context("Failed to serialize duration cache")?;
    self.store.set(&self.key, value).await.context("Failed to persist duration cache")?;
    Ok(count)
  }
}

impl DurationCache {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    let c = constants();
    Self::with_settings(store, &c.cache_key, c.persist_debounce())
  }

  pub fn with_settings(store: Arc<dyn KeyValueStore>, key: &str, persist_window: Duration) -> Self {
    let shared = Arc::new(Shared {
      store,
      key: key.to_string(),
      entries: StdMutex::default(),
      loaded: OnceCell::new(),
      writes: AsyncMutex::new(()),
    });

    let action: PersistAction = {
      let shared = Arc::clone(&shared);
      Box::new(move || {
        let shared = Arc::clone(&shared);
        async move {
          match shared.write_back().await {
            Ok(count) => debug!(entries = count, "cache: persisted"),
            Err(e) => warn!(err = %format!("{:#}", e), "cache: persist failed"),
          }
        }
        .boxed()
      })
    };

    Self { shared, persist: debounce(persist_window, action) }
  }

  /// Load stored entries once. Concurrent callers share the same load; a
  /// failed load leaves the cache empty and is never retried.
  pub async fn load(&self) {
    self.shared.load().await;
  }

  pub fn is_loaded(&self) -> bool {
    self.shared.loaded.initialized()
  }

  /// Cached duration, only if strictly positive.
  pub fn get(&self, id: &str) -> Option<u64> {
    lock(&self.shared.entries).get(id).map(|entry| entry.duration_seconds).filter(|s| *s > 0)
  }

  pub fn entry(&self, id: &str) -> Option<CacheEntry> {
    lock(&self.shared.entries).get(id).cloned()
  }

  /// Record a duration and schedule a write-back. Empty ids and zero
  /// durations are ignored. Returns whether the entry was stored.
  pub fn put(&self, id: &str, seconds: u64, source: DurationSource) -> bool {
    if id.is_empty() || seconds == 0 {
      return false;
    }

    let entry = CacheEntry { duration_seconds: seconds, source, updated_at: chrono::Utc::now().timestamp_millis() };
    lock(&self.shared.entries).insert(id.to_string(), entry);
    debug!(id, seconds, source = source.label(), "cache: stored");

    self.persist.trigger();
    true
  }

  /// Write back now instead of waiting for the debounce window. Waits for a
  /// persist that is already writing, then writes the current map after it.
  pub async fn flush(&self) -> Result<()> {
    let was_pending = self.persist.cancel();
    let count = self.shared.write_back().await?;
    debug!(entries = count, was_pending, "cache: flushed");
    Ok(())
  }

  /// Drop every entry and persist the empty cache.
  pub async fn clear(&self) -> Result<()> {
    // Load first, or the write-back would merge the stored entries back in.
    self.shared.load().await;
    lock(&self.shared.entries).clear();
    self.flush().await
  }

  /// All entries, sorted by video id.
  pub fn entries(&self) -> Vec<(VideoId, CacheEntry)> {
    let mut all: Vec<_> = lock(&self.shared.entries).iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
  }

  pub fn len(&self) -> usize {
    lock(&self.shared.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
