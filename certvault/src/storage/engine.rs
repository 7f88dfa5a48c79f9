//! Storage engine over a secret backend

use async_trait::async_trait;
use bytes::Bytes;
use certvault_core::{
    leaf_name, project_path, version_path, OpContext, Replication, Secret, SecretBackend,
    SecretVersion, LATEST_VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{CertStorage, KeyInfo};
use crate::config::{Config, ConfigError};
use crate::error::StorageError;
use crate::lock::LockTable;
use crate::resolver::{remote, KeyResolver};
use crate::retry::RetryPolicy;
use crate::version_cache::VersionCache;

/// Lifetime given to every secret stored with a non-zero TTL.
///
/// The requested TTL only switches expiry on; its length is ignored. Callers
/// depend on the one-minute value, so do not replace it with the argument.
pub const FIXED_TTL: Duration = Duration::from_secs(60);

/// Default number of secrets requested per listing page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Key/value storage and advisory locks on top of a [`SecretBackend`].
///
/// Every key is one secret named `projects/<project>/secrets/<key>` whose
/// latest version holds the value. Locks are keys named `lock-<name>`.
pub struct SecretManagerStorage {
    pub(crate) resolver: KeyResolver,
    pub(crate) locks: LockTable,
    pub(crate) retry: RetryPolicy,
}

impl SecretManagerStorage {
    pub fn new(backend: Arc<dyn SecretBackend>, project_id: &str) -> Self {
        Self {
            resolver: KeyResolver::new(backend, project_path(project_id), DEFAULT_PAGE_SIZE),
            locks: LockTable::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Build an HTTP-backed storage from validated configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = crate::client::HttpSecretBackend::from_config(config)?;

        Ok(Self::new(Arc::new(backend), &config.project_id)
            .with_page_size(config.list_page_size)
            .with_retry_policy(config.retry.policy()))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.resolver = self.resolver.with_page_size(page_size);
        self
    }

    /// `projects/<project>`
    pub fn parent(&self) -> &str {
        self.resolver.parent()
    }

    pub fn version_cache(&self) -> &VersionCache {
        self.resolver.cache()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Create the secret for `key`, expiring after [`FIXED_TTL`] when `ttl` is non-zero
    pub(crate) async fn create_secret(
        &self,
        ctx: &OpContext,
        key: &str,
        ttl: Duration,
    ) -> Result<Secret, StorageError> {
        let expiration = (!ttl.is_zero()).then_some(FIXED_TTL);
        debug!(key = %key, expiration = ?expiration, "creating secret");

        remote(
            ctx,
            self.resolver.backend().create_secret(
                self.parent(),
                key,
                Replication::Automatic,
                expiration,
            ),
        )
        .await
    }

    /// Write `value` as a new version of `secret` and remember its etag
    pub(crate) async fn add_version(
        &self,
        ctx: &OpContext,
        key: &str,
        secret: &Secret,
        value: &[u8],
    ) -> Result<SecretVersion, StorageError> {
        let version = remote(
            ctx,
            self.resolver
                .backend()
                .add_secret_version(&secret.name, Bytes::copy_from_slice(value)),
        )
        .await?;

        self.version_cache().record(key, &version.etag);
        debug!(key = %key, version = %version.name, "stored version");
        Ok(version)
    }

    /// Create a fresh secret for `key` holding `value`. No existence check is
    /// made; storing an existing key fails with the backend's `AlreadyExists`.
    pub(crate) async fn store_with_ttl(
        &self,
        ctx: &OpContext,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let secret = self.create_secret(ctx, key, ttl).await?;
        self.add_version(ctx, key, &secret, value).await?;
        Ok(())
    }

    async fn read_latest(
        &self,
        ctx: &OpContext,
        secret: &Secret,
    ) -> Result<SecretVersion, StorageError> {
        remote(
            ctx,
            self.resolver
                .backend()
                .get_secret_version(&version_path(&secret.name, LATEST_VERSION)),
        )
        .await
    }

    /// Delete the secret resolved for `key`, conditioned on its cached etag
    pub(crate) async fn delete_resolved(
        &self,
        ctx: &OpContext,
        key: &str,
    ) -> Result<(), StorageError> {
        let secret = self.resolver.find_key(ctx, key).await?;
        let etag = self.version_cache().get(key);

        remote(
            ctx,
            self.resolver
                .backend()
                .delete_secret(&secret.name, etag.as_deref()),
        )
        .await?;

        info!(key = %key, "deleted key");
        Ok(())
    }
}

#[async_trait]
impl CertStorage for SecretManagerStorage {
    async fn lock(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError> {
        self.acquire(ctx, name).await
    }

    async fn unlock(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError> {
        self.release(ctx, name).await
    }

    async fn store(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.store_with_ttl(ctx, key, value, Duration::ZERO).await
    }

    async fn load(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>, StorageError> {
        let secret = self.resolver.find_key(ctx, key).await?;
        let latest = self.read_latest(ctx, &secret).await?;

        let payload = remote(
            ctx,
            self.resolver.backend().access_secret_version(&latest.name),
        )
        .await?;

        Ok(payload.to_vec())
    }

    async fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), StorageError> {
        self.delete_resolved(ctx, key).await
    }

    async fn exists(&self, ctx: &OpContext, key: &str) -> bool {
        match self.resolver.find_key(ctx, key).await {
            Ok(_) => true,
            Err(StorageError::NotFound { .. }) => false,
            Err(e) => {
                warn!(key = %key, error = %e, "lookup failed, reporting key as absent");
                false
            }
        }
    }

    async fn list(
        &self,
        ctx: &OpContext,
        prefix: &str,
        _recursive: bool,
    ) -> Result<Vec<String>, StorageError> {
        let filter = if prefix.is_empty() {
            String::new()
        } else {
            format!("name:{}", prefix)
        };

        let mut pager = self.resolver.pager(filter);
        let mut keys = Vec::new();
        while let Some(secret) = remote(ctx, pager.next()).await? {
            keys.push(leaf_name(&secret.name).to_string());
        }

        Ok(keys)
    }

    async fn stat(&self, ctx: &OpContext, key: &str) -> Result<KeyInfo, StorageError> {
        let secret = self.resolver.find_key(ctx, key).await?;
        let latest = self.read_latest(ctx, &secret).await?;

        Ok(KeyInfo {
            key: leaf_name(&secret.name).to_string(),
            modified: latest.create_time,
            is_terminal: true,
        })
    }
}
