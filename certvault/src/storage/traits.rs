//! Certificate storage trait

use async_trait::async_trait;
use certvault_core::OpContext;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Metadata about a stored key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Leaf key name
    pub key: String,
    /// Creation time of the latest version
    pub modified: DateTime<Utc>,
    /// Always `true`: the keyspace is flat
    pub is_terminal: bool,
}

/// Storage contract consumed by the certificate manager
#[async_trait]
pub trait CertStorage: Send + Sync {
    /// Acquire the advisory lock `name`; fails with `AlreadyHeld` instead of waiting
    async fn lock(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError>;

    /// Release a lock previously acquired by this instance
    async fn unlock(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError>;

    /// Store `value` under a new key
    async fn store(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Latest value of `key`
    async fn load(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), StorageError>;

    /// Whether `key` resolves; any failure reads as `false`
    async fn exists(&self, ctx: &OpContext, key: &str) -> bool;

    /// Leaf names of keys matching `prefix`, in backend order
    async fn list(
        &self,
        ctx: &OpContext,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<String>, StorageError>;

    async fn stat(&self, ctx: &OpContext, key: &str) -> Result<KeyInfo, StorageError>;
}
