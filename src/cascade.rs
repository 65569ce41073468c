//! Per-tab duration resolution.
//!
//! Strategies run in a fixed order, cheapest first, and the first strictly
//! positive answer wins:
//!
//! 1. Cache: a duration learned earlier for the same video id
//! 2. Live query: ask the tab's content script
//! 3. Background fetch: download the watch page and read its markup
//! 4. Temp tab: for discarded tabs only, open the video in a background tab,
//!    wait for it to load, ask its content script, then close it
//!
//! Every failure along the way means "no answer" and moves on to the next step.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use crate::browser::{PageFetcher, TabEvent, TabId, TabSnapshot, TabStatus, Tabs};
use crate::cache::{DurationCache, DurationSource};
use crate::constants::constants;
use crate::duration::{extract_duration_from_html, seconds_from_reply};
use crate::video_url::{extract_video_id, is_video_url, normalize_video_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
  Cache,
  LiveQuery,
  BackgroundFetch,
  TempTab,
}

impl Strategy {
  /// Cheapest first.
  pub const ORDER: [Strategy; 4] = [Strategy::Cache, Strategy::LiveQuery, Strategy::BackgroundFetch, Strategy::TempTab];

  pub fn label(self) -> &'static str {
    match self {
      Strategy::Cache => "cache",
      Strategy::LiveQuery => "content-script",
      Strategy::BackgroundFetch => "background-fetch",
      Strategy::TempTab => "temp-tab",
    }
  }

  /// Tag recorded in the cache when this strategy succeeds. Cache hits are not re-recorded.
  fn cache_source(self) -> Option<DurationSource> {
    match self {
      Strategy::Cache => None,
      Strategy::LiveQuery => Some(DurationSource::ContentScript),
      Strategy::BackgroundFetch => Some(DurationSource::BackgroundFetch),
      Strategy::TempTab => Some(DurationSource::TempTab),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub seconds: u64,
  pub strategy: Strategy,
}

type InflightFetch = Shared<BoxFuture<'static, Option<u64>>>;

pub struct Resolver {
  cache: DurationCache,
  tabs: Arc<dyn Tabs>,
  fetcher: Arc<dyn PageFetcher>,
  /// Background fetches in flight, keyed by normalized URL.
  inflight: StdMutex<HashMap<String, InflightFetch>>,
  temp_tab_timeout: Duration,
}

async fn fetch_duration(fetcher: Arc<dyn PageFetcher>, url: String) -> Option<u64> {
  match fetcher.fetch_page(&url).await {
    Ok(html) => {
      let seconds = extract_duration_from_html(&html);
      if seconds.is_none() {
        debug!(url = %url, "cascade: no duration signal in fetched page");
      }
      seconds
    }
    Err(e) => {
      debug!(url = %url, err = %format!("{:#}", e), "cascade: background fetch failed");
      None
    }
  }
}

/// Resolve once `tab` reports load-complete, or the event stream ends.
async fn wait_for_load_complete(events: &mut broadcast::Receiver<TabEvent>, tab: TabId) {
  loop {
    match events.recv().await {
      Ok(TabEvent::Updated { tab: id, status: Some(TabStatus::Complete), .. }) if id == tab => return,
      Ok(_) | Err(RecvError::Lagged(_)) => continue,
      Err(RecvError::Closed) => return,
    }
  }
}

impl Resolver {
  pub fn new(cache: DurationCache, tabs: Arc<dyn Tabs>, fetcher: Arc<dyn PageFetcher>) -> Self {
    Self::with_timeout(cache, tabs, fetcher, constants().temp_tab_timeout())
  }

  pub fn with_timeout(
    cache: DurationCache,
    tabs: Arc<dyn Tabs>,
    fetcher: Arc<dyn PageFetcher>,
    temp_tab_timeout: Duration,
  ) -> Self {
    Self { cache, tabs, fetcher, inflight: StdMutex::default(), temp_tab_timeout }
  }

  pub fn cache(&self) -> &DurationCache {
    &self.cache
  }

  pub fn tabs(&self) -> &Arc<dyn Tabs> {
    &self.tabs
  }

  /// Run the strategies in order and return the first positive duration.
  /// Later strategies are never started once one succeeds.
  pub async fn resolve(&self, tab: &TabSnapshot) -> Option<Resolution> {
    let video_id = tab.url.as_deref().and_then(extract_video_id);

    for strategy in Strategy::ORDER {
      let Some(seconds) = self.attempt(strategy, tab, video_id.as_deref()).await.filter(|s| *s > 0) else {
        continue;
      };

      if let Some(source) = strategy.cache_source()
        && let Some(id) = video_id.as_deref()
      {
        self.cache.put(id, seconds, source);
      }
      debug!(tab = ?tab.id, video = ?video_id, seconds, strategy = strategy.label(), "cascade: resolved");
      return Some(Resolution { seconds, strategy });
    }

    debug!(tab = ?tab.id, video = ?video_id, "cascade: all strategies exhausted");
    None
  }

  async fn attempt(&self, strategy: Strategy, tab: &TabSnapshot, video_id: Option<&str>) -> Option<u64> {
    match strategy {
      Strategy::Cache => video_id.and_then(|id| self.cache.get(id)),
      Strategy::LiveQuery => match tab.id {
        Some(id) => self.query_content(id).await,
        None => None,
      },
      Strategy::BackgroundFetch => match tab.url.as_deref() {
        Some(url) if is_video_url(url) => self.background_fetch(url).await,
        _ => None,
      },
      Strategy::TempTab => match tab.url.as_deref() {
        Some(url) if tab.discarded && is_video_url(url) => self.temp_tab(url).await,
        _ => None,
      },
    }
  }

  async fn query_content(&self, tab: TabId) -> Option<u64> {
    match self.tabs.request_duration(tab).await {
      Ok(reply) => reply.duration_seconds.and_then(seconds_from_reply),
      Err(e) => {
        debug!(tab, err = %e, "cascade: content script did not answer");
        None
      }
    }
  }

  /// Fetch the normalized watch page. Concurrent callers for the same page
  /// share one request.
  async fn background_fetch(&self, url: &str) -> Option<u64> {
    let target = normalize_video_url(url);

    let fetch = {
      let mut inflight = self.inflight();
      inflight
        .entry(target.clone())
        .or_insert_with(|| fetch_duration(Arc::clone(&self.fetcher), target.clone()).boxed().shared())
        .clone()
    };

    let seconds = fetch.clone().await;

    let mut inflight = self.inflight();
    if inflight.get(&target).is_some_and(|current| current.ptr_eq(&fetch)) {
      inflight.remove(&target);
    }
    seconds
  }

  async fn temp_tab(&self, url: &str) -> Option<u64> {
    let target = normalize_video_url(url);
    // Subscribe before creating so the load-complete event cannot be missed.
    let mut events = self.tabs.subscribe();

    let tab = match self.tabs.create(&target, false).await {
      Ok(tab) => tab,
      Err(e) => {
        debug!(url = %target, err = %e, "cascade: could not open temp tab");
        return None;
      }
    };
    info!(tab, url = %target, "cascade: opened temp tab for discarded video");

    if tokio::time::timeout(self.temp_tab_timeout, wait_for_load_complete(&mut events, tab)).await.is_err() {
      debug!(tab, timeout_ms = self.temp_tab_timeout.as_millis() as u64, "cascade: temp tab load timed out");
    }

    let seconds = self.query_content(tab).await;

    if let Err(e) = self.tabs.remove(tab).await {
      debug!(tab, err = %e, "cascade: failed to close temp tab");
    }
    seconds
  }

  fn inflight(&self) -> MutexGuard<'_, HashMap<String, InflightFetch>> {
    self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
