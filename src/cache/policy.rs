//! Per-resource-class cache policies.
//!
//! A [`QueryPolicy`] decides three things for every key of its class: when
//! data goes stale, when an unobserved entry is evicted, and how failed
//! fetches are retried. Policies are fixed at startup and only ever read.
//!
//! | class        | fresh  | retention | background interval |
//! |--------------|--------|-----------|---------------------|
//! | doctors      | 5 min  | 10 min    | 5 min               |
//! | appointments | 1 min  | 5 min     | 30 s                |
//! | specialties  | 30 min | 60 min    | none                |
//! | profile      | 10 min | 30 min    | none                |

use std::collections::BTreeMap;
use std::time::Duration;

use super::key::ResourceClass;
use crate::error::{ClassifiedError, ErrorKind};

/// 4xx statuses that are still worth retrying (request timeout, rate limit).
const RETRYABLE_CLIENT_STATUSES: [u16; 2] = [408, 429];

/// Retry behavior for query fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first failure. Zero disables retrying.
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub const fn new(max_retries: u32) -> Self {
    Self {
      max_retries,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  pub const fn never() -> Self {
    Self::new(0)
  }

  /// Whether to try again after `failure_count` consecutive failures.
  pub fn should_retry(&self, failure_count: u32, error: &ClassifiedError) -> bool {
    if failure_count > self.max_retries {
      return false;
    }
    error.retryable || RETRYABLE_CLIENT_STATUSES.contains(&error.http_status)
  }

  /// Delay before retry number `attempt` (zero based): base * 2^attempt, capped.
  pub fn retry_delay(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

/// Retry behavior for mutations: once at most, and only when the request
/// never reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRetryPolicy {
  pub max_retries: u32,
  pub delay: Duration,
}

impl Default for MutationRetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 1,
      delay: Duration::from_secs(1),
    }
  }
}

impl MutationRetryPolicy {
  pub fn should_retry(&self, failure_count: u32, error: &ClassifiedError) -> bool {
    failure_count <= self.max_retries
      && error.kind == ErrorKind::NetworkUnreachable
      && !error.request_sent
  }
}

/// Cache policy for one resource class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPolicy {
  pub resource_class: ResourceClass,
  /// Data older than this is stale and refetched on the next read.
  pub fresh_window: Duration,
  /// Unobserved entries older than this are evicted.
  pub retention_window: Duration,
  pub retry: RetryPolicy,
  /// Polling period while the app is in the foreground.
  pub background_interval: Option<Duration>,
}

impl QueryPolicy {
  pub fn for_class(resource_class: ResourceClass) -> Self {
    const MINUTE: u64 = 60;
    match resource_class {
      ResourceClass::Doctors => Self {
        resource_class,
        fresh_window: Duration::from_secs(5 * MINUTE),
        retention_window: Duration::from_secs(10 * MINUTE),
        retry: RetryPolicy::new(3),
        background_interval: Some(Duration::from_secs(5 * MINUTE)),
      },
      ResourceClass::Appointments => Self {
        resource_class,
        fresh_window: Duration::from_secs(MINUTE),
        retention_window: Duration::from_secs(5 * MINUTE),
        retry: RetryPolicy::new(3),
        background_interval: Some(Duration::from_secs(30)),
      },
      ResourceClass::Specialties => Self {
        resource_class,
        fresh_window: Duration::from_secs(30 * MINUTE),
        retention_window: Duration::from_secs(60 * MINUTE),
        retry: RetryPolicy::new(3),
        background_interval: None,
      },
      ResourceClass::Profile => Self {
        resource_class,
        fresh_window: Duration::from_secs(10 * MINUTE),
        retention_window: Duration::from_secs(30 * MINUTE),
        retry: RetryPolicy::new(1),
        background_interval: None,
      },
    }
  }
}

/// Lookup table from resource class to policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  policies: BTreeMap<ResourceClass, QueryPolicy>,
  mutation_retry: MutationRetryPolicy,
}

impl Default for PolicyTable {
  fn default() -> Self {
    Self {
      policies: ResourceClass::ALL
        .into_iter()
        .map(|class| (class, QueryPolicy::for_class(class)))
        .collect(),
      mutation_retry: MutationRetryPolicy::default(),
    }
  }
}

impl PolicyTable {
  /// Replace the policy for its class.
  pub fn with_policy(mut self, policy: QueryPolicy) -> Self {
    self.policies.insert(policy.resource_class, policy);
    self
  }

  pub fn with_mutation_retry(mut self, retry: MutationRetryPolicy) -> Self {
    self.mutation_retry = retry;
    self
  }

  pub fn policy_for(&self, class: ResourceClass) -> &QueryPolicy {
    // The table is built from ResourceClass::ALL and entries are only replaced
    &self.policies[&class]
  }

  pub fn mutation_retry(&self) -> &MutationRetryPolicy {
    &self.mutation_retry
  }

  /// Classes that poll while foregrounded, with their period.
  pub fn polled_classes(&self) -> impl Iterator<Item = (ResourceClass, Duration)> + '_ {
    self
      .policies
      .values()
      .filter_map(|p| p.background_interval.map(|i| (p.resource_class, i)))
  }
}
