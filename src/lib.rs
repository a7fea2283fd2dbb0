//! Data layer of a patient appointment-booking client.
//!
//! The [`cache::CacheStore`] holds every server resource the client has seen
//! and serves it with stale-while-revalidate semantics. Writes go through the
//! [`mutation::MutationCoordinator`], which applies them optimistically and
//! rolls back on failure. The [`sync::Synchronizer`] keeps volatile data fresh
//! while the app is in the foreground, and [`query::Query`] gives UI code a
//! typed, reactive view of one key.

pub mod api;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod sync;

#[cfg(test)]
mod testing;
