//! Secret backend traits

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::BackendError;

/// Alias resolving to the most recent version of a secret
pub const LATEST_VERSION: &str = "latest";

/// Where the backend keeps replicas of a secret's payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Replication {
    #[default]
    Automatic,
    UserManaged { locations: Vec<String> },
}

/// A secret resource
#[derive(Debug, Clone)]
pub struct Secret {
    /// Full resource path (`projects/<project>/secrets/<id>`)
    pub name: String,
    pub replication: Replication,
    pub create_time: DateTime<Utc>,
    /// Instant after which the backend drops the secret
    pub expire_time: Option<DateTime<Utc>>,
    pub etag: String,
}

/// An immutable payload revision of a secret
#[derive(Debug, Clone)]
pub struct SecretVersion {
    /// Full resource path (`<secret>/versions/<n>`)
    pub name: String,
    pub create_time: DateTime<Utc>,
    pub etag: String,
}

/// One page of a secret listing
#[derive(Debug, Default)]
pub struct SecretPage {
    pub secrets: Vec<Secret>,
    pub next_page_token: Option<String>,
}

/// Remote secret-versioning service
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Create an empty secret under `parent`; fails with `AlreadyExists` on duplicates
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        replication: Replication,
        ttl: Option<Duration>,
    ) -> Result<Secret, BackendError>;

    /// Add a payload version to an existing secret
    async fn add_secret_version(
        &self,
        secret: &str,
        payload: Bytes,
    ) -> Result<SecretVersion, BackendError>;

    /// List one page of secrets matching `filter`
    async fn list_secrets(
        &self,
        parent: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<SecretPage, BackendError>;

    /// Get version metadata; accepts the `latest` alias
    async fn get_secret_version(&self, name: &str) -> Result<SecretVersion, BackendError>;

    /// Read a version's payload; accepts the `latest` alias
    async fn access_secret_version(&self, name: &str) -> Result<Bytes, BackendError>;

    /// Delete a secret and all its versions. A non-empty `etag` must match the
    /// secret's current etag or the call fails with `FailedPrecondition`.
    async fn delete_secret(&self, name: &str, etag: Option<&str>) -> Result<(), BackendError>;
}

/// Lazy iterator over a paged secret listing.
///
/// Pages are fetched on demand. Once exhausted the pager keeps returning
/// `None` until [`SecretPager::restart`] is called.
pub struct SecretPager<'a> {
    backend: &'a dyn SecretBackend,
    parent: String,
    filter: String,
    page_size: u32,
    buffered: VecDeque<Secret>,
    page_token: Option<String>,
    exhausted: bool,
}

impl<'a> SecretPager<'a> {
    pub fn new(
        backend: &'a dyn SecretBackend,
        parent: impl Into<String>,
        filter: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            backend,
            parent: parent.into(),
            filter: filter.into(),
            page_size,
            buffered: VecDeque::new(),
            page_token: None,
            exhausted: false,
        }
    }

    /// Next secret, fetching a new page when the buffer runs dry
    pub async fn next(&mut self) -> Result<Option<Secret>, BackendError> {
        loop {
            if let Some(secret) = self.buffered.pop_front() {
                return Ok(Some(secret));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .backend
                .list_secrets(
                    &self.parent,
                    &self.filter,
                    self.page_size,
                    self.page_token.as_deref(),
                )
                .await?;

            self.buffered.extend(page.secrets);
            self.page_token = page.next_page_token.filter(|t| !t.is_empty());
            self.exhausted = self.page_token.is_none();
        }
    }

    /// Start over from the first page
    pub fn restart(&mut self) {
        self.buffered.clear();
        self.page_token = None;
        self.exhausted = false;
    }
}

/// `projects/<project>`
pub fn project_path(project_id: &str) -> String {
    format!("projects/{}", project_id)
}

/// `<parent>/secrets/<id>`
pub fn secret_path(parent: &str, secret_id: &str) -> String {
    format!("{}/secrets/{}", parent, secret_id)
}

/// `<secret>/versions/<version>`
pub fn version_path(secret: &str, version: &str) -> String {
    format!("{}/versions/{}", secret, version)
}

/// Last path segment of a resource name
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let parent = project_path("my-project");
        assert_eq!(parent, "projects/my-project");

        let secret = secret_path(&parent, "example-com-crt");
        assert_eq!(secret, "projects/my-project/secrets/example-com-crt");

        assert_eq!(
            version_path(&secret, LATEST_VERSION),
            "projects/my-project/secrets/example-com-crt/versions/latest"
        );
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name("projects/p/secrets/lock-a"), "lock-a");
        assert_eq!(leaf_name("bare"), "bare");
        assert_eq!(leaf_name("projects/p/secrets/"), "");
    }
}
