//! In-memory browser fakes shared by the pipeline tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::browser::{DurationReply, PageFetcher, TabEvent, TabId, TabSnapshot, TabStatus, Tabs};

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn tab(id: TabId, url: &str) -> TabSnapshot {
  TabSnapshot { id: Some(id), url: Some(url.to_string()), discarded: false }
}

pub fn discarded_tab(id: TabId, url: &str) -> TabSnapshot {
  TabSnapshot { discarded: true, ..tab(id, url) }
}

pub struct FakeTabs {
  open: StdMutex<Vec<TabSnapshot>>,
  /// Content-script answers for already-open tabs.
  replies: StdMutex<HashMap<TabId, f64>>,
  /// Content-script answers for tabs created at a given URL.
  page_replies: StdMutex<HashMap<String, f64>>,
  created: StdMutex<Vec<(TabId, String, bool)>>,
  removed: StdMutex<Vec<TabId>>,
  requests: AtomicUsize,
  queries: AtomicUsize,
  next_id: AtomicI64,
  events: broadcast::Sender<TabEvent>,
  complete_on_create: bool,
  fail_query: bool,
}

impl FakeTabs {
  pub fn new(open: Vec<TabSnapshot>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      open: StdMutex::new(open),
      replies: StdMutex::default(),
      page_replies: StdMutex::default(),
      created: StdMutex::default(),
      removed: StdMutex::default(),
      requests: AtomicUsize::new(0),
      queries: AtomicUsize::new(0),
      next_id: AtomicI64::new(1000),
      events,
      complete_on_create: true,
      fail_query: false,
    }
  }

  /// Created tabs never report load-complete.
  pub fn never_completing(mut self) -> Self {
    self.complete_on_create = false;
    self
  }

  pub fn failing_query(mut self) -> Self {
    self.fail_query = true;
    self
  }

  pub fn reply(self, tab: TabId, seconds: f64) -> Self {
    lock(&self.replies).insert(tab, seconds);
    self
  }

  pub fn page_reply(self, url: &str, seconds: f64) -> Self {
    lock(&self.page_replies).insert(url.to_string(), seconds);
    self
  }

  pub fn set_open(&self, open: Vec<TabSnapshot>) {
    *lock(&self.open) = open;
  }

  pub fn emit(&self, event: TabEvent) {
    let _ = self.events.send(event);
  }

  /// `(tab, url, active)` for every created tab.
  pub fn created(&self) -> Vec<(TabId, String, bool)> {
    lock(&self.created).clone()
  }

  pub fn removed(&self) -> Vec<TabId> {
    lock(&self.removed).clone()
  }

  pub fn requests(&self) -> usize {
    self.requests.load(Ordering::SeqCst)
  }

  pub fn queries(&self) -> usize {
    self.queries.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Tabs for FakeTabs {
  async fn query(&self, _patterns: &[String]) -> Result<Vec<TabSnapshot>> {
    self.queries.fetch_add(1, Ordering::SeqCst);
    if self.fail_query {
      return Err(anyhow!("tabs API unavailable"));
    }
    Ok(lock(&self.open).clone())
  }

  async fn request_duration(&self, tab: TabId) -> Result<DurationReply> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    tokio::task::yield_now().await;
    match lock(&self.replies).get(&tab) {
      Some(seconds) => Ok(DurationReply { duration_seconds: Some(*seconds) }),
      None => Err(anyhow!("Could not establish connection. Receiving end does not exist.")),
    }
  }

  async fn create(&self, url: &str, active: bool) -> Result<TabId> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    lock(&self.created).push((id, url.to_string(), active));
    if let Some(seconds) = lock(&self.page_replies).get(url).copied() {
      lock(&self.replies).insert(id, seconds);
    }
    if self.complete_on_create {
      self.emit(TabEvent::Updated { tab: id, status: Some(TabStatus::Loading), url: Some(url.to_string()) });
      self.emit(TabEvent::Updated { tab: id, status: Some(TabStatus::Complete), url: Some(url.to_string()) });
    }
    Ok(id)
  }

  async fn remove(&self, tab: TabId) -> Result<()> {
    lock(&self.removed).push(tab);
    lock(&self.replies).remove(&tab);
    Ok(())
  }

  fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
    self.events.subscribe()
  }
}

/// Serves canned markup by URL; unknown URLs fail like a network error.
#[derive(Default)]
pub struct FakeFetcher {
  pages: StdMutex<HashMap<String, String>>,
  calls: AtomicUsize,
  latency: Duration,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn page(self, url: &str, html: &str) -> Self {
    lock(&self.pages).insert(url.to_string(), html.to_string());
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
  async fn fetch_page(&self, url: &str) -> Result<String> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    lock(&self.pages).get(url).cloned().ok_or_else(|| anyhow!("network error fetching {}", url))
  }
}
