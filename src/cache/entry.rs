//! Cache entry state as seen by consumers.

use std::time::Duration;
use tokio::time::Instant;

use super::key::QueryKey;
use crate::api::Resource;
use crate::error::ClassifiedError;

/// Fetch status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Never fetched
  #[default]
  Idle,
  /// First fetch in progress, no data yet
  Loading,
  Success,
  /// Last fetch failed; `data` still holds the last good value, if any
  Error,
}

/// A snapshot of one cached query.
///
/// Consumers only ever get clones; the store owns the live value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub data: Option<Resource>,
  /// When `data` was last written, by a fetch or directly
  pub fetched_at: Option<Instant>,
  pub status: QueryStatus,
  pub error: Option<ClassifiedError>,
  /// Consecutive failed fetch attempts
  pub failure_count: u32,
  /// Set by invalidation; forces the next read to refetch
  pub invalidated: bool,
}

impl CacheEntry {
  pub fn new(key: QueryKey) -> Self {
    Self {
      key,
      data: None,
      fetched_at: None,
      status: QueryStatus::Idle,
      error: None,
      failure_count: 0,
      invalidated: false,
    }
  }

  pub fn age(&self, now: Instant) -> Option<Duration> {
    self.fetched_at.map(|t| now.saturating_duration_since(t))
  }

  /// Whether a read at `now` should go to the network.
  pub fn is_stale(&self, fresh_window: Duration, now: Instant) -> bool {
    if self.invalidated || self.data.is_none() {
      return true;
    }
    match self.age(now) {
      Some(age) => age >= fresh_window,
      None => true,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }
}
