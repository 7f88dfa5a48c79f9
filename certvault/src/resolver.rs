//! Key name to secret resolution

use certvault_core::{OpContext, Secret, SecretBackend, SecretPager};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::StorageError;
use crate::version_cache::VersionCache;

/// Maps logical keys to the backend's current secret for them
pub struct KeyResolver {
    backend: Arc<dyn SecretBackend>,
    parent: String,
    page_size: u32,
    cache: VersionCache,
}

impl KeyResolver {
    pub fn new(backend: Arc<dyn SecretBackend>, parent: impl Into<String>, page_size: u32) -> Self {
        Self {
            backend,
            parent: parent.into(),
            page_size,
            cache: VersionCache::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn backend(&self) -> &dyn SecretBackend {
        self.backend.as_ref()
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    /// Lazily page through secrets matching a server-side `filter`
    pub fn pager(&self, filter: impl Into<String>) -> SecretPager<'_> {
        SecretPager::new(self.backend.as_ref(), self.parent.clone(), filter, self.page_size)
    }

    /// Find the secret for `name` and remember its etag.
    ///
    /// The server-side `name:` filter is a substring match, so results are
    /// checked for an exact `/secrets/<name>` suffix. The first hit wins; if
    /// the listing order is not stable neither is the choice among duplicates.
    pub async fn find_key(&self, ctx: &OpContext, name: &str) -> Result<Secret, StorageError> {
        let suffix = format!("/secrets/{}", name);
        let mut pager = self.pager(format!("name:{}", name));

        while let Some(secret) = remote(ctx, pager.next()).await? {
            if secret.name.ends_with(&suffix) {
                debug!(key = %name, secret = %secret.name, etag = %secret.etag, "resolved key");
                self.cache.record(name, &secret.etag);
                return Ok(secret);
            }
        }

        Err(StorageError::not_found(name))
    }
}

/// Await a backend call within the context's deadline
pub(crate) async fn remote<T, F>(ctx: &OpContext, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, certvault_core::BackendError>>,
{
    Ok(ctx.run(call).await??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use certvault_core::{project_path, ErrorCode, Replication};
    use certvault_secretmanager::{Operation, SecretManagerEmulator};

    fn resolver() -> (KeyResolver, Arc<SecretManagerEmulator>) {
        let emulator = Arc::new(SecretManagerEmulator::new());
        let resolver = KeyResolver::new(emulator.clone(), project_path("p"), 2);
        (resolver, emulator)
    }

    fn seed(emulator: &SecretManagerEmulator, id: &str) -> Secret {
        let secret = emulator
            .create(&project_path("p"), id, Replication::Automatic, None)
            .unwrap();
        emulator
            .add_version(&secret.name, Bytes::from_static(b"v"))
            .unwrap();
        secret
    }

    #[tokio::test]
    async fn test_find_key_requires_exact_suffix() {
        let (resolver, emulator) = resolver();
        seed(&emulator, "lock-site");
        seed(&emulator, "my-site");
        let site = seed(&emulator, "site");

        let found = resolver
            .find_key(&OpContext::background(), "site")
            .await
            .unwrap();

        assert_eq!(found.name, site.name);
        assert_eq!(resolver.cache().get("site"), Some(site.etag));
    }

    #[tokio::test]
    async fn test_find_key_not_found() {
        let (resolver, emulator) = resolver();
        seed(&emulator, "lock-site");

        let result = resolver.find_key(&OpContext::background(), "site").await;
        assert!(matches!(result, Err(StorageError::NotFound { key }) if key == "site"));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_find_key_surfaces_backend_failure() {
        let (resolver, emulator) = resolver();
        seed(&emulator, "site");
        emulator.fail_next(Operation::ListSecrets, ErrorCode::PermissionDenied, 1);

        let result = resolver.find_key(&OpContext::background(), "site").await;
        assert!(matches!(result, Err(StorageError::Backend(e)) if e.code == ErrorCode::PermissionDenied));
    }

    #[tokio::test]
    async fn test_find_key_walks_pages() {
        let (resolver, emulator) = resolver();
        for id in ["a-site", "b-site", "c-site", "d-site"] {
            seed(&emulator, id);
        }
        let target = seed(&emulator, "site");

        let found = resolver
            .find_key(&OpContext::background(), "site")
            .await
            .unwrap();
        assert_eq!(found.name, target.name);
    }
}
