//! Core types and traits for certvault
//!
//! This crate provides the secret backend contract shared by the storage
//! engine, the HTTP client and the in-memory emulator.

pub mod backend;
pub mod context;
pub mod error;
pub mod wire;

pub use backend::{
    leaf_name, project_path, secret_path, version_path, Replication, Secret, SecretBackend,
    SecretPage, SecretPager, SecretVersion, LATEST_VERSION,
};
pub use context::{ContextError, OpContext};
pub use error::{BackendError, ErrorCode};
