//! Reactive view of one cache key for UI code.
//!
//! A `Query<T>` subscribes to a key in the [`CacheStore`] and turns store
//! notifications into a typed [`QueryState`]. Notifications arrive over a
//! channel, so the UI drains them on its own schedule.
//!
//! # Example
//!
//! ```ignore
//! let mut query: Query<Vec<Appointment>> = Query::new(&store, QueryKey::MyAppointments);
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error { error, data } => render_error(error, data.as_ref()),
//!     QueryState::Idle => {}
//! }
//! ```

use tokio::sync::mpsc;

use crate::api::Resource;
use crate::cache::{CacheEntry, CacheStore, QueryKey, QueryStatus, Subscription};
use crate::error::ClassifiedError;

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Nothing requested yet
  Idle,
  /// First fetch in progress
  Loading,
  Success(T),
  /// Last fetch failed; `data` is the last good value, if any
  Error {
    error: ClassifiedError,
    data: Option<T>,
  },
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error { .. })
  }

  /// Latest known data, including stale data kept through an error.
  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      QueryState::Error { data, .. } => data.as_ref(),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ClassifiedError> {
    match self {
      QueryState::Error { error, .. } => Some(error),
      _ => None,
    }
  }
}

impl<T: TryFrom<Resource>> QueryState<T> {
  fn from_entry(entry: &CacheEntry) -> Self {
    let data = entry.data.clone().and_then(|r| T::try_from(r).ok());
    let mismatch = entry.data.is_some() && data.is_none();

    match entry.status {
      _ if mismatch => QueryState::Error {
        error: ClassifiedError::unknown(format!("Unexpected data cached for {}", entry.key)),
        data: None,
      },
      QueryStatus::Idle => QueryState::Idle,
      QueryStatus::Loading => QueryState::Loading,
      QueryStatus::Success => match data {
        Some(data) => QueryState::Success(data),
        None => QueryState::Loading,
      },
      QueryStatus::Error => QueryState::Error {
        error: entry
          .error
          .clone()
          .unwrap_or_else(|| ClassifiedError::unknown("Fetch failed")),
        data,
      },
    }
  }
}

/// A live, typed view of one cache key.
///
/// Dropping the query unsubscribes it from the store.
pub struct Query<T> {
  store: CacheStore,
  key: QueryKey,
  state: QueryState<T>,
  receiver: mpsc::UnboundedReceiver<CacheEntry>,
  _subscription: Subscription,
}

impl<T: TryFrom<Resource>> Query<T> {
  /// Subscribe to `key` and read it, starting a fetch if the cached value is
  /// missing or stale.
  pub fn new(store: &CacheStore, key: QueryKey) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = store.subscribe(&key, move |entry| {
      // Ignore send errors - the query may be mid-drop
      let _ = tx.send(entry.clone());
    });
    let entry = store.read(&key);

    Self {
      store: store.clone(),
      key,
      state: QueryState::from_entry(&entry),
      receiver: rx,
      _subscription: subscription,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn error(&self) -> Option<&ClassifiedError> {
    self.state.error()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Raw cache entry behind this query.
  pub fn entry(&self) -> Option<CacheEntry> {
    self.store.entry(&self.key)
  }

  /// Read through the cache; fetches only if the data is stale.
  pub fn fetch(&mut self) {
    let entry = self.store.read(&self.key);
    self.state = QueryState::from_entry(&entry);
  }

  /// Fetch from the network regardless of freshness. Current data stays
  /// visible until the new result lands.
  pub fn refetch(&mut self) {
    drop(self.store.refetch(&self.key));
    if self.state.data().is_none() {
      self.state = QueryState::Loading;
    }
  }

  /// Apply pending store notifications.
  ///
  /// Returns `true` if anything arrived. An invalidated entry is read again
  /// right away, since this query is watching it.
  pub fn poll(&mut self) -> bool {
    let mut latest = None;
    while let Ok(entry) = self.receiver.try_recv() {
      latest = Some(entry);
    }

    let Some(entry) = latest else {
      return false;
    };
    self.state = QueryState::from_entry(&entry);
    if entry.invalidated {
      self.store.read(&self.key);
    }
    true
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
