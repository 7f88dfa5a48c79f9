//! Secret Manager emulation for certvault
//!
//! Provides an in-memory secret-versioning backend with support for:
//! - CreateSecret, AddSecretVersion, ListSecrets (filters, paging)
//! - GetSecretVersion, AccessSecretVersion (`latest` alias)
//! - DeleteSecret with etag preconditions, TTL expiry
//! - Fault injection and delayed listings for tests

pub mod handlers;
mod storage;

pub use handlers::router;
pub use storage::{EmulatorState, Operation, SecretManagerEmulator};
