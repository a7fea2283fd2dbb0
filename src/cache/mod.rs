//! Client-side query cache.
//!
//! This module provides the store behind every read in the app:
//! - Typed query keys grouped into resource classes
//! - Per-class freshness, retention and retry policies
//! - Stale-while-revalidate reads with one fetch in flight per key
//! - Subscriptions for reactive consumers and periodic eviction

mod entry;
mod key;
mod policy;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use key::{KeyPattern, QueryKey, ResourceClass};
pub use policy::{MutationRetryPolicy, PolicyTable, QueryPolicy, RetryPolicy};
pub use store::{CacheStore, CapturedEntry, FetchResult, SharedFetch, Subscription};
