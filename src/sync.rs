//! Lifecycle-driven background refresh.
//!
//! The host tells the synchronizer whether the app is in the foreground. While
//! it is, every resource class with a background interval gets one timer that
//! periodically invalidates the class and refetches what is on screen. Going
//! to the background stops all timers at once.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::{CacheStore, KeyPattern, ResourceClass};

/// Whether the host app is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
  Foreground,
  #[default]
  Background,
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Lifecycle::Foreground => write!(f, "foreground"),
      Lifecycle::Background => write!(f, "background"),
    }
  }
}

/// Owns the per-class refresh timers.
pub struct Synchronizer {
  store: CacheStore,
  lifecycle: Arc<Mutex<Lifecycle>>,
  timers: Mutex<BTreeMap<ResourceClass, JoinHandle<()>>>,
}

impl Synchronizer {
  /// Create a synchronizer in the background state with no timers running.
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      lifecycle: Arc::new(Mutex::new(Lifecycle::Background)),
      timers: Mutex::new(BTreeMap::new()),
    }
  }

  pub fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle.lock()
  }

  /// Number of class timers currently running.
  pub fn active_timers(&self) -> usize {
    self
      .timers
      .lock()
      .values()
      .filter(|handle| !handle.is_finished())
      .count()
  }

  /// Switch state and timers together. Concurrent callers are serialized on
  /// the timer table, so timers only ever run in the foreground.
  pub fn set_lifecycle(&self, next: Lifecycle) {
    let mut timers = self.timers.lock();
    let previous = std::mem::replace(&mut *self.lifecycle.lock(), next);
    if previous != next {
      info!(from = %previous, to = %next, "Lifecycle changed");
    }

    stop_all(&mut timers);

    if next == Lifecycle::Background {
      return;
    }

    for (class, period) in self.store.policies().polled_classes() {
      let handle = spawn_timer(self.store.clone(), Arc::clone(&self.lifecycle), class, period);
      timers.insert(class, handle);
    }
    debug!(timers = timers.len(), "Started refresh timers");
    drop(timers);

    if previous == Lifecycle::Background {
      let pattern = KeyPattern::Class(ResourceClass::Appointments);
      self.store.invalidate(&pattern);
      self.store.refetch_observed(&pattern);
    }
  }

  /// Stop every timer. The lifecycle state is left as is.
  pub fn shutdown(&self) {
    stop_all(&mut self.timers.lock());
  }
}

impl Drop for Synchronizer {
  fn drop(&mut self) {
    stop_all(self.timers.get_mut());
  }
}

fn stop_all(timers: &mut BTreeMap<ResourceClass, JoinHandle<()>>) {
  for (class, handle) in std::mem::take(timers) {
    debug!(class = %class, "Stopping refresh timer");
    handle.abort();
  }
}

fn spawn_timer(
  store: CacheStore,
  lifecycle: Arc<Mutex<Lifecycle>>,
  class: ResourceClass,
  period: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      interval.tick().await;
      tick(&store, &lifecycle, class);
    }
  })
}

/// One refresh of a class. Returns false when the app is no longer in the
/// foreground and nothing was done.
fn tick(store: &CacheStore, lifecycle: &Mutex<Lifecycle>, class: ResourceClass) -> bool {
  if *lifecycle.lock() != Lifecycle::Foreground {
    return false;
  }
  let pattern = KeyPattern::Class(class);
  let invalidated = store.invalidate(&pattern);
  let refetched = store.refetch_observed(&pattern);
  debug!(class = %class, invalidated, refetched, "Background refresh");
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::AppointmentStatus;
  use crate::cache::{PolicyTable, QueryKey};
  use crate::testing::{appointments, specialties, FakeClient, RecordingAuth};

  fn setup() -> (Arc<FakeClient>, CacheStore) {
    let client = Arc::new(FakeClient::default());
    let store = CacheStore::new(
      client.clone(),
      Arc::new(RecordingAuth::default()),
      PolicyTable::default(),
    );
    (client, store)
  }

  #[tokio::test(start_paused = true)]
  async fn test_foreground_twice_keeps_one_timer_per_class() {
    let (_, store) = setup();
    let sync = Synchronizer::new(store);
    assert_eq!(sync.active_timers(), 0);

    sync.set_lifecycle(Lifecycle::Foreground);
    sync.set_lifecycle(Lifecycle::Foreground);
    // doctors and appointments poll; specialties and profile do not
    assert_eq!(sync.active_timers(), 2);

    sync.set_lifecycle(Lifecycle::Background);
    assert_eq!(sync.active_timers(), 0);
    assert_eq!(sync.lifecycle(), Lifecycle::Background);
  }

  #[tokio::test(start_paused = true)]
  async fn test_tick_refetches_observed_appointments() {
    let (client, store) = setup();
    let key = QueryKey::MyAppointments;
    client.on_fetch(&key, Ok(appointments(&[("a1", AppointmentStatus::Pending)])));
    store.fetch(&key).await.unwrap();
    let _sub = store.subscribe(&key, |_| {});

    let sync = Synchronizer::new(store.clone());
    sync.set_lifecycle(Lifecycle::Foreground);
    tokio::time::sleep(Duration::from_secs(1)).await;
    // entering the foreground refreshes appointments right away
    assert_eq!(client.fetch_count(&key), 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.fetch_count(&key), 3);
    assert!(!store.entry(&key).unwrap().invalidated);
  }

  #[tokio::test(start_paused = true)]
  async fn test_background_stops_refresh() {
    let (client, store) = setup();
    let key = QueryKey::MyAppointments;
    client.on_fetch(&key, Ok(appointments(&[])));
    store.fetch(&key).await.unwrap();
    let _sub = store.subscribe(&key, |_| {});

    let sync = Synchronizer::new(store.clone());
    sync.set_lifecycle(Lifecycle::Foreground);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = client.fetch_count(&key);

    sync.set_lifecycle(Lifecycle::Background);
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(client.fetch_count(&key), before);
  }

  #[tokio::test(start_paused = true)]
  async fn test_tick_is_noop_in_background() {
    let (client, store) = setup();
    let key = QueryKey::MyAppointments;
    client.on_fetch(&key, Ok(appointments(&[])));
    store.fetch(&key).await.unwrap();

    let lifecycle = Mutex::new(Lifecycle::Background);
    assert!(!tick(&store, &lifecycle, ResourceClass::Appointments));
    assert!(!store.entry(&key).unwrap().invalidated);

    *lifecycle.lock() = Lifecycle::Foreground;
    assert!(tick(&store, &lifecycle, ResourceClass::Appointments));
    assert!(store.entry(&key).unwrap().invalidated);
  }

  #[tokio::test(start_paused = true)]
  async fn test_resume_invalidates_only_appointments() {
    let (client, store) = setup();
    client.on_fetch(&QueryKey::MyAppointments, Ok(appointments(&[])));
    client.on_fetch(&QueryKey::Specialties, Ok(specialties(&["Cardiology"])));
    store.fetch(&QueryKey::MyAppointments).await.unwrap();
    store.fetch(&QueryKey::Specialties).await.unwrap();

    let sync = Synchronizer::new(store.clone());
    sync.set_lifecycle(Lifecycle::Foreground);

    assert!(store.entry(&QueryKey::MyAppointments).unwrap().invalidated);
    assert!(!store.entry(&QueryKey::Specialties).unwrap().invalidated);
    // nobody is watching, so nothing is refetched until the next read
    assert_eq!(client.fetch_count(&QueryKey::MyAppointments), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_switches_leave_state_and_timers_in_step() {
    let (_, store) = setup();
    let sync = Arc::new(Synchronizer::new(store));

    for _ in 0..50 {
      let switches: Vec<_> = [Lifecycle::Foreground, Lifecycle::Background]
        .into_iter()
        .map(|next| {
          let sync = Arc::clone(&sync);
          tokio::spawn(async move { sync.set_lifecycle(next) })
        })
        .collect();
      for switch in switches {
        switch.await.unwrap();
      }

      let expected = match sync.lifecycle() {
        Lifecycle::Foreground => 2,
        Lifecycle::Background => 0,
      };
      assert_eq!(sync.active_timers(), expected);
    }
    sync.shutdown();
  }

  #[tokio::test(start_paused = true)]
  async fn test_shutdown_and_drop_stop_timers() {
    let (_, store) = setup();
    let sync = Synchronizer::new(store);
    sync.set_lifecycle(Lifecycle::Foreground);
    sync.shutdown();
    assert_eq!(sync.active_timers(), 0);
    assert_eq!(sync.lifecycle(), Lifecycle::Foreground);

    sync.set_lifecycle(Lifecycle::Foreground);
    assert_eq!(sync.active_timers(), 2);
    drop(sync);
  }
}
