use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, Report};
use crate::browser::{Message, TabEvent};
use crate::constants::constants;
use crate::debounce::{Debounced, debounce};

type RefreshAction = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Turns tab lifecycle events and popup requests into refreshes.
///
/// Lifecycle events are debounced so a burst (a session restore opening
/// dozens of tabs) costs one aggregation. Explicit requests run immediately.
pub struct Coordinator {
  aggregator: Arc<Aggregator>,
  debounced: Debounced<RefreshAction>,
}

impl Coordinator {
  pub fn new(aggregator: Arc<Aggregator>) -> Self {
    Self::with_window(aggregator, constants().refresh_debounce())
  }

  pub fn with_window(aggregator: Arc<Aggregator>, window: Duration) -> Self {
    let action: RefreshAction = {
      let aggregator = Arc::clone(&aggregator);
      Box::new(move || {
        let aggregator = Arc::clone(&aggregator);
        async move {
          if let Err(e) = aggregator.refresh_totals().await {
            warn!(err = %format!("{:#}", e), "coordinator: scheduled refresh failed");
          }
        }
        .boxed()
      })
    };
    Self { aggregator, debounced: debounce(window, action) }
  }

  pub fn aggregator(&self) -> &Arc<Aggregator> {
    &self.aggregator
  }

  /// Refresh after the default quiet period, superseding any pending refresh.
  pub fn schedule_refresh(&self) {
    self.debounced.trigger();
  }

  pub fn schedule_refresh_after(&self, delay: Duration) {
    self.debounced.trigger_after(delay);
  }

  pub fn refresh_pending(&self) -> bool {
    self.debounced.is_pending()
  }

  /// Refresh right away, bypassing the debounce.
  pub async fn refresh_now(&self) -> Result<Report> {
    self.aggregator.refresh_totals().await
  }

  /// Browser install/startup hook.
  pub async fn on_startup(&self) -> Result<Report> {
    info!("coordinator: startup refresh");
    self.refresh_now().await
  }

  /// Schedule a refresh for events that can change the totals. Returns
  /// whether one was scheduled.
  pub fn handle_event(&self, event: &TabEvent) -> bool {
    let relevant = match event {
      TabEvent::Created(_) | TabEvent::Removed(_) => true,
      TabEvent::Updated { url, .. } => event.is_load_complete() && url.is_some(),
    };
    if relevant {
      debug!(event = ?event, "coordinator: scheduling refresh");
      self.schedule_refresh();
    }
    relevant
  }

  /// Handle a runtime message. Only [`Message::RefreshTotals`] is addressed
  /// to this side; anything else yields `None`.
  pub async fn handle_message(&self, message: Message) -> Option<Result<Report>> {
    match message {
      Message::RefreshTotals => Some(self.refresh_now().await),
      Message::GetDuration => None,
    }
  }

  /// Consume lifecycle events until the stream closes.
  pub async fn run(&self, mut events: broadcast::Receiver<TabEvent>) {
    loop {
      match events.recv().await {
        Ok(event) => {
          self.handle_event(&event);
        }
        Err(RecvError::Lagged(skipped)) => {
          debug!(skipped, "coordinator: lagged behind tab events, refreshing anyway");
          self.schedule_refresh();
        }
        Err(RecvError::Closed) => break,
      }
    }
    debug!("coordinator: event stream closed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::browser::TabStatus;
  use crate::cache::DurationCache;
  use crate::cascade::Resolver;
  use crate::store::MemoryStore;
  use crate::testing::{FakeFetcher, FakeTabs, tab};

  const WINDOW: Duration = Duration::from_millis(250);

  fn coordinator(tabs: Arc<FakeTabs>) -> Coordinator {
    let store = Arc::new(MemoryStore::new());
    let cache = DurationCache::new(store.clone());
    let resolver = Resolver::with_timeout(cache, tabs, Arc::new(FakeFetcher::new()), Duration::from_secs(15));
    Coordinator::with_window(Arc::new(Aggregator::new(resolver, store)), WINDOW)
  }

  fn complete(tab: i64, url: Option<&str>) -> TabEvent {
    TabEvent::Updated { tab, status: Some(TabStatus::Complete), url: url.map(str::to_string) }
  }

  #[tokio::test(start_paused = true)]
  async fn burst_of_schedules_refreshes_once() {
    let tabs = Arc::new(FakeTabs::new(vec![]));
    let c = coordinator(tabs.clone());

    for _ in 0..5 {
      c.schedule_refresh();
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tabs.queries(), 0);

    tokio::time::sleep(WINDOW * 4).await;
    assert_eq!(tabs.queries(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn relevant_events_schedule() {
    let c = coordinator(Arc::new(FakeTabs::new(vec![])));

    assert!(c.handle_event(&TabEvent::Created(1)));
    assert!(c.handle_event(&TabEvent::Removed(1)));
    assert!(c.handle_event(&complete(1, Some("https://youtu.be/a"))));
    assert!(!c.handle_event(&complete(1, None)));
    assert!(!c.handle_event(&TabEvent::Updated { tab: 1, status: Some(TabStatus::Loading), url: None }));
    assert!(!c.handle_event(&TabEvent::Updated { tab: 1, status: None, url: Some("https://youtu.be/a".into()) }));
    assert!(c.refresh_pending());
  }

  #[tokio::test(start_paused = true)]
  async fn refresh_message_runs_immediately() {
    let tabs = Arc::new(FakeTabs::new(vec![tab(1, "https://youtu.be/a")]).reply(1, 30.0));
    let c = coordinator(tabs.clone());

    let report = c.handle_message(Message::RefreshTotals).await.unwrap().unwrap();

    assert_eq!(report.summary.total_seconds, 30);
    assert_eq!(tabs.queries(), 1);
    assert!(c.handle_message(Message::GetDuration).await.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn run_debounces_event_stream() {
    let tabs = Arc::new(FakeTabs::new(vec![]));
    let c = coordinator(tabs.clone());
    let (tx, rx) = broadcast::channel(16);

    for id in 0..4 {
      tx.send(TabEvent::Created(id)).unwrap();
    }
    tx.send(complete(9, Some("https://www.youtube.com/watch?v=z"))).unwrap();
    drop(tx);

    c.run(rx).await;
    tabs.set_open(vec![tab(9, "https://www.youtube.com/watch?v=z")]);
    tokio::time::sleep(WINDOW * 4).await;

    assert_eq!(tabs.queries(), 1);
    let summary = c.aggregator().last_summary().await.unwrap().unwrap();
    assert_eq!((summary.total_tabs, summary.unknown_count), (1, 1));
  }

  #[tokio::test(start_paused = true)]
  async fn startup_refreshes_immediately() {
    let tabs = Arc::new(FakeTabs::new(vec![]));
    let c = coordinator(tabs.clone());
    c.on_startup().await.unwrap();
    assert_eq!(tabs.queries(), 1);
  }
}
