use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// An async action behind a single cancellable timer.
///
/// Every trigger aborts the pending timer and starts a new one, so a burst of
/// triggers inside the window runs the action once, after the last trigger.
/// Aborting only ever hits the timer: once the action has started it runs to
/// completion as its own task.
pub struct Debounced<F> {
  action: Arc<F>,
  window: Duration,
  pending: StdMutex<Option<JoinHandle<()>>>,
}

/// Wrap `action` so that triggers within `window` of each other collapse into one run.
pub fn debounce<F, Fut>(window: Duration, action: F) -> Debounced<F>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Debounced { action: Arc::new(action), window, pending: StdMutex::new(None) }
}

impl<F, Fut> Debounced<F>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  pub fn window(&self) -> Duration {
    self.window
  }

  /// Restart the timer with the default window.
  pub fn trigger(&self) {
    self.trigger_after(self.window);
  }

  /// Restart the timer with an explicit delay.
  pub fn trigger_after(&self, delay: Duration) {
    let action = Arc::clone(&self.action);
    let mut pending = self.pending();
    if let Some(handle) = pending.take() {
      handle.abort();
    }
    *pending = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      tokio::spawn((*action)());
    }));
  }

  /// Drop the pending timer, if any. Returns whether one was still waiting.
  pub fn cancel(&self) -> bool {
    match self.pending().take() {
      Some(handle) => {
        let waiting = !handle.is_finished();
        handle.abort();
        waiting
      }
      None => false,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.pending().as_ref().is_some_and(|handle| !handle.is_finished())
  }

  fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    // The guard is never held across an await, so a poisoned lock still holds a valid handle.
    self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
