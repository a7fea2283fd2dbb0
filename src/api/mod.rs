//! Backend access: domain types, payload normalization and the HTTP client.

pub mod api_types;
pub mod auth;
pub mod client;
pub mod resource;
pub mod types;

pub use auth::{AuthProvider, TokenStore};
pub use client::ApiClient;
pub use resource::{Operation, Resource, ResourceClient};
