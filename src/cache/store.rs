//! In-memory query cache with stale-while-revalidate reads.
//!
//! The store is the only mutable shared state in the client. Every mutation of
//! an entry happens synchronously under the store lock and the lock is never
//! held across an await point; the only suspension points are the network
//! calls made by fetch tasks.
//!
//! Consistency rules:
//! - at most one fetch per key is in flight; concurrent readers share its
//!   result through a [`Shared`] future
//! - every fetch carries the key's generation at the time it started, and its
//!   result is dropped if the generation has moved on (a forced refetch, a
//!   direct write or a rollback all bump it)
//! - listeners are called outside the lock, with a snapshot of the entry;
//!   a snapshot older than one already delivered for the same key is dropped

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, QueryStatus};
use super::key::{KeyPattern, QueryKey};
use super::policy::PolicyTable;
use crate::api::auth::AuthProvider;
use crate::api::{Resource, ResourceClient};
use crate::error::{escalate, ClassifiedError};

/// Outcome of a fetch, shared among everyone waiting on it.
pub type FetchResult = Result<Resource, ClassifiedError>;

/// Handle on an in-flight fetch.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// An entry as it was before an optimistic change, plus the generation that
/// change left on its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEntry {
  pub entry: CacheEntry,
  pub generation: u64,
}

/// Query cache shared by every consumer in the process.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  client: Arc<dyn ResourceClient>,
  auth: Arc<dyn AuthProvider>,
  policies: PolicyTable,
  state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
  slots: HashMap<QueryKey, Slot>,
  next_listener_id: u64,
}

struct Slot {
  entry: CacheEntry,
  generation: u64,
  in_flight: Option<InFlight>,
  listeners: Vec<(u64, Listener)>,
  /// When the slot last became unobserved; drives eviction
  inactive_since: Option<Instant>,
  /// Sequence number of the latest notification queued for this slot
  notified: u64,
  /// Sequence number of the latest notification handed to listeners
  delivered: Arc<Mutex<u64>>,
}

struct InFlight {
  generation: u64,
  fetch: SharedFetch,
}

impl Slot {
  fn new(key: QueryKey, now: Instant) -> Self {
    Self {
      entry: CacheEntry::new(key),
      generation: 0,
      in_flight: None,
      listeners: Vec::new(),
      inactive_since: Some(now),
      notified: 0,
      delivered: Arc::new(Mutex::new(0)),
    }
  }

  fn listeners(&self) -> Vec<Listener> {
    self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
  }

  /// Invalidate whatever is in flight and take ownership of the entry.
  fn supersede(&mut self) {
    self.generation += 1;
    self.in_flight = None;
  }
}

struct Pending {
  sequence: u64,
  delivered: Arc<Mutex<u64>>,
  listeners: Vec<Listener>,
  entry: CacheEntry,
}

/// Pending notifications collected under the lock, delivered after it.
///
/// Two threads can reach `deliver` in either order, so every snapshot carries
/// its slot's sequence number and is dropped if a later one got there first.
/// Listeners run under the slot's delivery lock and must not write to the
/// key they observe.
#[derive(Default)]
struct Notifications(Vec<Pending>);

impl Notifications {
  fn push(&mut self, slot: &mut Slot) {
    if slot.listeners.is_empty() {
      return;
    }
    slot.notified += 1;
    self.0.push(Pending {
      sequence: slot.notified,
      delivered: Arc::clone(&slot.delivered),
      listeners: slot.listeners(),
      entry: slot.entry.clone(),
    });
  }

  fn deliver(self) {
    for pending in self.0 {
      let mut delivered = pending.delivered.lock();
      if *delivered >= pending.sequence {
        debug!(key = %pending.entry.key, sequence = pending.sequence, "Dropping stale notification");
        continue;
      }
      *delivered = pending.sequence;
      for listener in &pending.listeners {
        listener(&pending.entry);
      }
    }
  }
}

impl CacheStore {
  pub fn new(
    client: Arc<dyn ResourceClient>,
    auth: Arc<dyn AuthProvider>,
    policies: PolicyTable,
  ) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        client,
        auth,
        policies,
        state: Mutex::new(StoreState::default()),
      }),
    }
  }

  pub fn policies(&self) -> &PolicyTable {
    &self.inner.policies
  }

  pub(crate) fn client(&self) -> &Arc<dyn ResourceClient> {
    &self.inner.client
  }

  pub(crate) fn auth(&self) -> &Arc<dyn AuthProvider> {
    &self.inner.auth
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Current entry for `key`, kicking off a background fetch if it is missing
  /// or stale. Never waits on the network.
  pub fn read(&self, key: &QueryKey) -> CacheEntry {
    self.plan_fetch(key).0
  }

  /// Data for `key`, going to the network only if the cached value is stale.
  ///
  /// Callers arriving while a fetch is in flight wait on that same fetch.
  pub async fn fetch(&self, key: &QueryKey) -> FetchResult {
    let (entry, pending) = self.plan_fetch(key);
    match pending {
      Some(fetch) => fetch.await,
      None => entry
        .data
        .ok_or_else(|| ClassifiedError::unknown(format!("No data cached for {}", key))),
    }
  }

  /// Start a new fetch even if one is already running. The older fetch is
  /// left to finish but its result will be discarded.
  pub fn refetch(&self, key: &QueryKey) -> SharedFetch {
    let now = Instant::now();
    let (fetch, task) = {
      let mut state = self.inner.state.lock();
      let slot = state
        .slots
        .entry(key.clone())
        .or_insert_with(|| Slot::new(key.clone(), now));
      self.begin_fetch(slot)
    };
    tokio::spawn(task);
    fetch
  }

  /// Snapshot of an entry without triggering any fetch.
  pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
    self
      .inner
      .state
      .lock()
      .slots
      .get(key)
      .map(|slot| slot.entry.clone())
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    self
      .inner
      .state
      .lock()
      .slots
      .get(key)
      .is_some_and(|slot| slot.in_flight.is_some())
  }

  pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
    self
      .inner
      .state
      .lock()
      .slots
      .keys()
      .filter(|key| pattern.matches(key))
      .cloned()
      .collect()
  }

  pub fn subscriber_count(&self, key: &QueryKey) -> usize {
    self
      .inner
      .state
      .lock()
      .slots
      .get(key)
      .map_or(0, |slot| slot.listeners.len())
  }

  pub fn len(&self) -> usize {
    self.inner.state.lock().slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Decide whether a read needs the network, and start or join a fetch if so.
  fn plan_fetch(&self, key: &QueryKey) -> (CacheEntry, Option<SharedFetch>) {
    let now = Instant::now();
    let fresh_window = self
      .inner
      .policies
      .policy_for(key.resource_class())
      .fresh_window;

    let (entry, fetch, task) = {
      let mut state = self.inner.state.lock();
      let slot = state
        .slots
        .entry(key.clone())
        .or_insert_with(|| Slot::new(key.clone(), now));

      if slot.listeners.is_empty() {
        slot.inactive_since = Some(now);
      }

      if !slot.entry.is_stale(fresh_window, now) {
        return (slot.entry.clone(), None);
      }

      if let Some(in_flight) = &slot.in_flight {
        return (slot.entry.clone(), Some(in_flight.fetch.clone()));
      }

      let (fetch, task) = self.begin_fetch(slot);
      (slot.entry.clone(), fetch, task)
    };

    tokio::spawn(task);
    (entry, Some(fetch))
  }

  /// Register a new fetch generation on the slot. The returned future must be
  /// spawned once the lock is released.
  fn begin_fetch(&self, slot: &mut Slot) -> (SharedFetch, SharedFetch) {
    slot.generation += 1;
    let generation = slot.generation;
    if slot.entry.data.is_none() {
      slot.entry.status = QueryStatus::Loading;
    }

    let key = slot.entry.key.clone();
    debug!(key = %key, generation, "Starting fetch");

    let fetch = run_fetch(Arc::clone(&self.inner), key, generation)
      .boxed()
      .shared();
    slot.in_flight = Some(InFlight {
      generation,
      fetch: fetch.clone(),
    });
    (fetch.clone(), fetch)
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  /// Replace the data for `key` and mark it fresh.
  pub fn write(&self, key: &QueryKey, data: Resource) {
    let now = Instant::now();
    let mut notifications = Notifications::default();
    {
      let mut state = self.inner.state.lock();
      let slot = state
        .slots
        .entry(key.clone())
        .or_insert_with(|| Slot::new(key.clone(), now));
      slot.supersede();
      store_data(&mut slot.entry, data, now);
      notifications.push(slot);
    }
    notifications.deliver();
  }

  /// Apply `f` to the cached data for `key`, if there is any. Returns whether
  /// anything changed.
  pub fn update<F>(&self, key: &QueryKey, f: F) -> bool
  where
    F: FnOnce(&Resource) -> Option<Resource>,
  {
    let now = Instant::now();
    let mut notifications = Notifications::default();
    let changed = {
      let mut state = self.inner.state.lock();
      let Some(slot) = state.slots.get_mut(key) else {
        return false;
      };
      let Some(next) = slot.entry.data.as_ref().and_then(f) else {
        return false;
      };
      slot.supersede();
      store_data(&mut slot.entry, next, now);
      notifications.push(slot);
      true
    };
    notifications.deliver();
    changed
  }

  /// Snapshot every cached entry matching `patterns`, then apply `updater` to
  /// their data, all in one step. Returns the entries as they were before.
  ///
  /// Every matched key is superseded, so fetches that started before the
  /// optimistic change cannot overwrite it.
  pub fn apply_optimistic<F>(&self, patterns: &[KeyPattern], updater: F) -> Vec<CapturedEntry>
  where
    F: Fn(&QueryKey, &Resource) -> Option<Resource>,
  {
    let now = Instant::now();
    let mut notifications = Notifications::default();
    let mut prior = Vec::new();
    {
      let mut state = self.inner.state.lock();
      for slot in state.slots.values_mut() {
        let key = slot.entry.key.clone();
        if !patterns.iter().any(|p| p.matches(&key)) {
          continue;
        }
        let entry = slot.entry.clone();
        slot.supersede();
        prior.push(CapturedEntry {
          entry,
          generation: slot.generation,
        });

        let next = slot.entry.data.as_ref().and_then(|data| updater(&key, data));
        if let Some(next) = next {
          store_data(&mut slot.entry, next, now);
          notifications.push(slot);
        }
      }
    }
    notifications.deliver();
    prior
  }

  /// Put captured entries back exactly as they were.
  ///
  /// A slot that moved on since the capture (a reconcile, a write or another
  /// rollback) holds newer state than the snapshot; it is only marked
  /// invalidated so the next read goes back to the server.
  pub fn restore(&self, captured: Vec<CapturedEntry>) {
    let now = Instant::now();
    let mut notifications = Notifications::default();
    {
      let mut state = self.inner.state.lock();
      for CapturedEntry { entry, generation } in captured {
        let key = entry.key.clone();
        let slot = state
          .slots
          .entry(key.clone())
          .or_insert_with(|| Slot::new(key.clone(), now));
        if slot.generation != generation {
          debug!(
            key = %key,
            captured = generation,
            current = slot.generation,
            "Skipping rollback of superseded entry"
          );
          slot.entry.invalidated = true;
        } else {
          slot.supersede();
          slot.entry = entry;
        }
        notifications.push(slot);
      }
    }
    notifications.deliver();
  }

  /// Mark matching entries stale. Data is kept so consumers can keep showing
  /// it while the refetch runs. Returns how many entries matched.
  pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
    let mut notifications = Notifications::default();
    let mut matched = 0;
    {
      let mut state = self.inner.state.lock();
      for slot in state.slots.values_mut() {
        if pattern.matches(&slot.entry.key) {
          slot.entry.invalidated = true;
          notifications.push(slot);
          matched += 1;
        }
      }
    }
    if matched == 0 {
      debug!(pattern = %pattern, "Invalidation matched no entries");
    }
    notifications.deliver();
    matched
  }

  /// Fetch every observed entry matching `pattern` that is stale, joining
  /// fetches already in flight. Returns how many keys were considered.
  pub fn refetch_observed(&self, pattern: &KeyPattern) -> usize {
    let keys = self.observed_keys(pattern);
    for key in &keys {
      self.read(key);
    }
    keys.len()
  }

  /// Invalidate `pattern` and start fresh fetches for every observed match,
  /// superseding anything already in flight. Used after a successful write so
  /// the server's state replaces provisional data.
  ///
  /// Every match is superseded, observed or not, so no earlier snapshot can
  /// be rolled back over it.
  pub fn reconcile(&self, pattern: &KeyPattern) {
    let mut notifications = Notifications::default();
    let observed: Vec<QueryKey> = {
      let mut state = self.inner.state.lock();
      state
        .slots
        .values_mut()
        .filter(|slot| pattern.matches(&slot.entry.key))
        .filter_map(|slot| {
          slot.supersede();
          slot.entry.invalidated = true;
          notifications.push(slot);
          (!slot.listeners.is_empty()).then(|| slot.entry.key.clone())
        })
        .collect()
    };
    notifications.deliver();
    for key in observed {
      self.refetch(&key);
    }
  }

  fn observed_keys(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
    self
      .inner
      .state
      .lock()
      .slots
      .values()
      .filter(|slot| !slot.listeners.is_empty() && pattern.matches(&slot.entry.key))
      .map(|slot| slot.entry.key.clone())
      .collect()
  }

  // ==========================================================================
  // Subscriptions
  // ==========================================================================

  /// Register `callback` for every write, invalidation and failure on `key`.
  ///
  /// The listener is removed when the returned [`Subscription`] is dropped.
  pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
  where
    F: Fn(&CacheEntry) + Send + Sync + 'static,
  {
    let now = Instant::now();
    let mut state = self.inner.state.lock();
    let id = state.next_listener_id;
    state.next_listener_id += 1;

    let slot = state
      .slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone(), now));
    slot.listeners.push((id, Arc::new(callback)));
    slot.inactive_since = None;

    Subscription {
      store: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
    }
  }

  // ==========================================================================
  // Garbage collection
  // ==========================================================================

  /// Evict entries nobody has observed for longer than their retention
  /// window. Entries with a fetch in flight are kept. Returns evicted count.
  pub fn collect_garbage(&self) -> usize {
    let now = Instant::now();
    let policies = &self.inner.policies;
    let mut state = self.inner.state.lock();
    let before = state.slots.len();

    state.slots.retain(|key, slot| {
      let retention = policies.policy_for(key.resource_class()).retention_window;
      let expired = slot
        .inactive_since
        .is_some_and(|since| now.saturating_duration_since(since) >= retention);
      !(expired && slot.listeners.is_empty() && slot.in_flight.is_none())
    });

    let evicted = before - state.slots.len();
    if evicted > 0 {
      debug!(evicted, remaining = state.slots.len(), "Evicted cache entries");
    }
    evicted
  }

  /// Run [`collect_garbage`](Self::collect_garbage) every `period` until the
  /// store is dropped.
  pub fn spawn_gc(&self, period: Duration) -> JoinHandle<()> {
    let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      loop {
        interval.tick().await;
        let Some(inner) = store.upgrade() else {
          break;
        };
        CacheStore { inner }.collect_garbage();
      }
    })
  }
}

fn store_data(entry: &mut CacheEntry, data: Resource, now: Instant) {
  entry.data = Some(data);
  entry.fetched_at = Some(now);
  entry.status = QueryStatus::Success;
  entry.error = None;
  entry.failure_count = 0;
  entry.invalidated = false;
}

impl StoreInner {
  fn is_current(&self, key: &QueryKey, generation: u64) -> bool {
    self
      .state
      .lock()
      .slots
      .get(key)
      .is_some_and(|slot| slot.generation == generation)
  }

  fn settle_success(&self, key: &QueryKey, generation: u64, data: &Resource) {
    let mut notifications = Notifications::default();
    {
      let mut state = self.state.lock();
      let Some(slot) = state.slots.get_mut(key) else {
        return;
      };
      if slot.generation != generation {
        debug!(
          key = %key,
          generation,
          current = slot.generation,
          "Discarding superseded fetch result"
        );
        return;
      }
      slot.in_flight = None;
      store_data(&mut slot.entry, data.clone(), Instant::now());
      notifications.push(slot);
    }
    debug!(key = %key, generation, "Fetch succeeded");
    notifications.deliver();
  }

  /// Record a failed attempt. Returns false if the fetch has been superseded.
  fn settle_failure(
    &self,
    key: &QueryKey,
    generation: u64,
    error: &ClassifiedError,
    failure_count: u32,
    finished: bool,
  ) -> bool {
    let mut notifications = Notifications::default();
    {
      let mut state = self.state.lock();
      let Some(slot) = state.slots.get_mut(key) else {
        return false;
      };
      if slot.generation != generation {
        return false;
      }
      if finished {
        slot.in_flight = None;
      }
      slot.entry.status = QueryStatus::Error;
      slot.entry.error = Some(error.clone());
      slot.entry.failure_count = failure_count;
      notifications.push(slot);
    }
    notifications.deliver();
    true
  }
}

/// Fetch `key` with retries, writing the outcome back into the store.
async fn run_fetch(inner: Arc<StoreInner>, key: QueryKey, generation: u64) -> FetchResult {
  let retry = inner.policies.policy_for(key.resource_class()).retry.clone();
  let mut failures = 0u32;

  loop {
    match inner.client.fetch_resource(&key).await {
      Ok(data) => {
        inner.settle_success(&key, generation, &data);
        return Ok(data);
      }
      Err(error) => {
        failures += 1;
        escalate(&error, inner.auth.as_ref());

        let will_retry = retry.should_retry(failures, &error);
        let current = inner.settle_failure(&key, generation, &error, failures, !will_retry);
        if !current {
          return Err(error);
        }
        if !will_retry {
          warn!(key = %key, failures, error = %error, "Fetch failed");
          return Err(error);
        }

        let delay = retry.retry_delay(failures - 1);
        info!(
          key = %key,
          failures,
          delay_ms = delay.as_millis() as u64,
          error = %error,
          "Fetch failed, retrying"
        );
        tokio::time::sleep(delay).await;

        if !inner.is_current(&key, generation) {
          return Err(error);
        }
      }
    }
  }
}

/// Keeps a listener registered. Dropping it unsubscribes.
pub struct Subscription {
  store: Weak<StoreInner>,
  key: QueryKey,
  id: u64,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn unsubscribe(self) {
    // Drop does the work
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let Some(inner) = self.store.upgrade() else {
      return;
    };
    let mut state = inner.state.lock();
    if let Some(slot) = state.slots.get_mut(&self.key) {
      slot.listeners.retain(|(id, _)| *id != self.id);
      if slot.listeners.is_empty() {
        slot.inactive_since = Some(Instant::now());
      }
    }
  }
}
