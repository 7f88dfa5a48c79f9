//! certvault - certificate storage on Google Secret Manager
//!
//! Keys are stored one per secret, values as secret versions, and advisory
//! locks as short-lived `lock-<name>` secrets. [`SecretManagerStorage`] runs
//! against any [`SecretBackend`](certvault_core::SecretBackend): the REST
//! client in [`client`] for real deployments or the in-memory emulator from
//! `certvault-secretmanager` for tests.

pub mod client;
pub mod config;
pub mod error;
pub mod lock;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod version_cache;

pub use client::HttpSecretBackend;
pub use config::{Config, ConfigError, RetryConfig};
pub use error::StorageError;
pub use lock::lock_key;
pub use retry::RetryPolicy;
pub use storage::{CertStorage, KeyInfo, SecretManagerStorage, DEFAULT_PAGE_SIZE, FIXED_TTL};

pub use certvault_core::OpContext;
