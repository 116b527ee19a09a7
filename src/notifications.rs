use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

pub const DEFAULT_LIFETIME: Duration = Duration::from_millis(5000);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Success,
  Error,
  Info,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Notification {
  pub id: u64,
  pub message: String,
  pub severity: Severity,
}

pub type SubscriptionId = u64;

type Callback = Box<dyn Fn(&[Notification]) + Send + Sync>;

struct BusState {
  next_id: u64,
  live: Vec<Notification>,
  timers: HashMap<u64, AbortHandle>,
  next_subscription: SubscriptionId,
  subscribers: BTreeMap<SubscriptionId, Callback>,
}

impl BusState {
  fn deliver(&self) {
    for callback in self.subscribers.values() {
      callback(&self.live);
    }
  }

  fn remove(&mut self, id: u64) -> bool {
    let before = self.live.len();
    self.live.retain(|n| n.id != id);
    if let Some(timer) = self.timers.remove(&id) {
      timer.abort();
    }
    if self.live.len() == before {
      return false;
    }
    self.deliver();
    true
  }
}

/// Clones share the same live set. Callbacks run under the bus lock and must
/// not call back into the bus.
#[derive(Clone)]
pub struct NotificationBus {
  state: Arc<Mutex<BusState>>,
  lifetime: Duration,
}

impl Default for NotificationBus {
  fn default() -> Self {
    Self::new(DEFAULT_LIFETIME)
  }
}

impl NotificationBus {
  pub fn new(lifetime: Duration) -> Self {
    Self {
      state: Arc::new(Mutex::new(BusState {
        next_id: 0,
        live: Vec::new(),
        timers: HashMap::new(),
        next_subscription: 0,
        subscribers: BTreeMap::new(),
      })),
      lifetime,
    }
  }

  fn lock(&self) -> MutexGuard<'_, BusState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn publish(&self, message: impl Into<String>, severity: Severity) -> u64 {
    let message = message.into();
    let mut state = self.lock();
    let id = state.next_id;
    state.next_id += 1;
    tracing::debug!(id, ?severity, %message, "notification published");
    state.live.push(Notification {
      id,
      message,
      severity,
    });
    state.deliver();

    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        let weak = Arc::downgrade(&self.state);
        let lifetime = self.lifetime;
        let task = runtime.spawn(async move {
          tokio::time::sleep(lifetime).await;
          expire(weak, id);
        });
        state.timers.insert(id, task.abort_handle());
      }
      Err(_) => {
        tracing::warn!(id, "no async runtime, notification will not expire on its own");
      }
    }
    id
  }

  pub fn success(&self, message: impl Into<String>) -> u64 {
    self.publish(message, Severity::Success)
  }

  pub fn error(&self, message: impl Into<String>) -> u64 {
    self.publish(message, Severity::Error)
  }

  pub fn info(&self, message: impl Into<String>) -> u64 {
    self.publish(message, Severity::Info)
  }

  /// Removes a notification now. Unknown or already expired ids are ignored.
  pub fn dismiss(&self, id: u64) -> bool {
    self.lock().remove(id)
  }

  /// Registers a callback and immediately hands it the current live set.
  pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&[Notification]) + Send + Sync + 'static,
  {
    let mut state = self.lock();
    let id = state.next_subscription;
    state.next_subscription += 1;
    callback(&state.live);
    state.subscribers.insert(id, Box::new(callback));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.lock().subscribers.remove(&id).is_some()
  }

  /// Like [`subscribe`](Self::subscribe), but the subscription ends when the
  /// returned guard is dropped.
  pub fn subscribe_guarded<F>(&self, callback: F) -> SubscriptionGuard
  where
    F: Fn(&[Notification]) + Send + Sync + 'static,
  {
    let id = self.subscribe(callback);
    SubscriptionGuard {
      bus: self.clone(),
      id,
    }
  }

  pub fn live(&self) -> Vec<Notification> {
    self.lock().live.clone()
  }

  #[cfg(test)]
  pub(crate) fn subscriber_count(&self) -> usize {
    self.lock().subscribers.len()
  }
}

fn expire(state: Weak<Mutex<BusState>>, id: u64) {
  let Some(state) = state.upgrade() else {
    return;
  };
  let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
  // The handle belongs to this task; drop it instead of aborting ourselves.
  state.timers.remove(&id);
  if state.remove(id) {
    tracing::debug!(id, "notification expired");
  }
}

pub struct SubscriptionGuard {
  bus: NotificationBus,
  id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
  fn drop(&mut self) {
    self.bus.unsubscribe(self.id);
  }
}
