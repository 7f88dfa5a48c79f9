//! HTTP client for the Secret Manager API

mod auth;
mod rest;

pub use auth::{AuthError, ServiceAccountKey, TokenSource};
pub use rest::HttpSecretBackend;
