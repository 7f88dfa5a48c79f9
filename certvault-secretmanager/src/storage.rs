//! Secret Manager in-memory storage

use async_trait::async_trait;
use bytes::Bytes;
use certvault_core::{
    secret_path, version_path, BackendError, ErrorCode, Replication, Secret, SecretBackend,
    SecretPage, SecretVersion, LATEST_VERSION,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

static SECRET_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("valid secret id pattern"));

const DEFAULT_PAGE_SIZE: usize = 100;

/// Backend calls that can have failures injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSecret,
    AddSecretVersion,
    ListSecrets,
    GetSecretVersion,
    AccessSecretVersion,
    DeleteSecret,
}

/// A stored version and its payload
#[derive(Debug, Clone)]
struct StoredVersion {
    version: SecretVersion,
    payload: Bytes,
}

/// A stored secret with its versions, oldest first
#[derive(Debug, Clone)]
struct StoredSecret {
    secret: Secret,
    versions: Vec<StoredVersion>,
}

/// In-memory Secret Manager
#[derive(Debug, Default)]
pub struct SecretManagerEmulator {
    /// Secrets indexed by full resource path
    secrets: RwLock<BTreeMap<String, StoredSecret>>,
    /// Pending injected failures per operation
    faults: Mutex<HashMap<Operation, VecDeque<ErrorCode>>>,
    /// Offset applied to the wall clock
    clock_skew: Mutex<Duration>,
    /// Newly created secrets stay out of listings for this long
    listing_delay: Option<chrono::Duration>,
}

impl SecretManagerEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulate eventually consistent listings: a secret only shows up in
    /// `list` once it is older than `delay`.
    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = chrono::Duration::from_std(delay).ok();
        self
    }

    /// Move the emulator's clock forward
    pub fn advance(&self, by: Duration) {
        *self.clock_skew.lock() += by;
    }

    /// Make the next `times` calls of `operation` fail with `code`
    pub fn fail_next(&self, operation: Operation, code: ErrorCode, times: usize) {
        self.faults
            .lock()
            .entry(operation)
            .or_default()
            .extend(std::iter::repeat(code).take(times));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of live secrets
    pub fn len(&self) -> usize {
        let now = self.now();
        self.secrets
            .read()
            .values()
            .filter(|s| !is_expired(&s.secret, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a secret by path, ignoring listing delay
    pub fn get_secret(&self, name: &str) -> Result<Secret, BackendError> {
        let now = self.now();
        self.secrets
            .read()
            .get(name)
            .filter(|s| !is_expired(&s.secret, now))
            .map(|s| s.secret.clone())
            .ok_or_else(|| BackendError::not_found(format!("Secret [{}]", name)))
    }

    fn now(&self) -> DateTime<Utc> {
        let skew = *self.clock_skew.lock();
        Utc::now() + chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn take_fault(&self, operation: Operation) -> Result<(), BackendError> {
        let code = self
            .faults
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);

        match code {
            Some(code) => Err(BackendError::new(
                code,
                format!("injected failure for {:?}", operation),
            )),
            None => Ok(()),
        }
    }

    fn purge_expired(secrets: &mut BTreeMap<String, StoredSecret>, now: DateTime<Utc>) {
        secrets.retain(|_, s| !is_expired(&s.secret, now));
    }

    /// Create a new secret
    pub fn create(
        &self,
        parent: &str,
        secret_id: &str,
        replication: Replication,
        ttl: Option<Duration>,
    ) -> Result<Secret, BackendError> {
        self.take_fault(Operation::CreateSecret)?;

        if !SECRET_ID.is_match(secret_id) {
            return Err(BackendError::new(
                ErrorCode::InvalidArgument,
                format!(
                    "secret_id [{}] must match [a-zA-Z_0-9-]+ and be at most 255 characters",
                    secret_id
                ),
            ));
        }
        validate_parent(parent)?;

        let now = self.now();
        let name = secret_path(parent, secret_id);
        let mut secrets = self.secrets.write();
        Self::purge_expired(&mut secrets, now);

        if secrets.contains_key(&name) {
            return Err(BackendError::new(
                ErrorCode::AlreadyExists,
                format!("Secret [{}] already exists.", name),
            )
            .with_resource(name));
        }

        let expire_time = match ttl {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl).map_err(|e| {
                    BackendError::new(ErrorCode::InvalidArgument, format!("invalid ttl: {}", e))
                })?,
            ),
            None => None,
        };

        let secret = Secret {
            name: name.clone(),
            replication,
            create_time: now,
            expire_time,
            etag: new_etag(),
        };

        secrets.insert(
            name,
            StoredSecret {
                secret: secret.clone(),
                versions: Vec::new(),
            },
        );
        Ok(secret)
    }

    /// Add a version to an existing secret
    pub fn add_version(&self, secret: &str, payload: Bytes) -> Result<SecretVersion, BackendError> {
        self.take_fault(Operation::AddSecretVersion)?;

        let now = self.now();
        let mut secrets = self.secrets.write();
        let stored = secrets
            .get_mut(secret)
            .filter(|s| !is_expired(&s.secret, now))
            .ok_or_else(|| BackendError::not_found(format!("Secret [{}]", secret)))?;

        let version = SecretVersion {
            name: version_path(secret, &(stored.versions.len() + 1).to_string()),
            create_time: now,
            etag: new_etag(),
        };

        stored.versions.push(StoredVersion {
            version: version.clone(),
            payload,
        });
        Ok(version)
    }

    /// List one page of secrets under `parent` matching `filter`, ordered by path
    pub fn list(
        &self,
        parent: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<SecretPage, BackendError> {
        self.take_fault(Operation::ListSecrets)?;
        validate_parent(parent)?;

        let filter = Filter::parse(filter);
        let after = page_token.map(decode_page_token).transpose()?;
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n as usize,
        };

        let now = self.now();
        let prefix = format!("{}/secrets/", parent);
        let secrets = self.secrets.read();

        let mut matching = secrets
            .range::<String, _>((
                after
                    .as_ref()
                    .map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded),
                std::ops::Bound::Unbounded,
            ))
            .map(|(_, s)| &s.secret)
            .filter(|s| s.name.starts_with(&prefix))
            .filter(|s| !is_expired(s, now))
            .filter(|s| self.is_listed(s, now))
            .filter(|s| filter.matches(s));

        let page: Vec<Secret> = matching.by_ref().take(page_size).cloned().collect();
        let next_page_token = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(encode_page_token(&last.name)),
            _ => None,
        };

        Ok(SecretPage {
            secrets: page,
            next_page_token,
        })
    }

    fn is_listed(&self, secret: &Secret, now: DateTime<Utc>) -> bool {
        match self.listing_delay {
            Some(delay) => secret.create_time + delay <= now,
            None => true,
        }
    }

    fn find_version(&self, name: &str) -> Result<StoredVersion, BackendError> {
        let (secret, version_id) = name
            .rsplit_once("/versions/")
            .ok_or_else(|| {
                BackendError::new(
                    ErrorCode::InvalidArgument,
                    format!("invalid secret version name [{}]", name),
                )
            })?;

        let now = self.now();
        let secrets = self.secrets.read();
        let stored = secrets
            .get(secret)
            .filter(|s| !is_expired(&s.secret, now))
            .ok_or_else(|| BackendError::not_found(format!("Secret [{}]", secret)))?;

        let version = if version_id == LATEST_VERSION {
            stored.versions.last()
        } else {
            version_id
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| stored.versions.get(idx))
        };

        version
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("Secret Version [{}]", name)))
    }

    /// Get version metadata
    pub fn get_version(&self, name: &str) -> Result<SecretVersion, BackendError> {
        self.take_fault(Operation::GetSecretVersion)?;
        self.find_version(name).map(|v| v.version)
    }

    /// Read a version's payload
    pub fn access_version(&self, name: &str) -> Result<(SecretVersion, Bytes), BackendError> {
        self.take_fault(Operation::AccessSecretVersion)?;
        self.find_version(name).map(|v| (v.version, v.payload))
    }

    /// Delete a secret, honouring the etag precondition when one is given
    pub fn delete(&self, name: &str, etag: Option<&str>) -> Result<Secret, BackendError> {
        self.take_fault(Operation::DeleteSecret)?;

        let now = self.now();
        let mut secrets = self.secrets.write();
        Self::purge_expired(&mut secrets, now);

        let stored = secrets
            .get(name)
            .ok_or_else(|| BackendError::not_found(format!("Secret [{}]", name)))?;

        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            if etag != stored.secret.etag {
                return Err(BackendError::new(
                    ErrorCode::FailedPrecondition,
                    format!(
                        "The etag provided [{}] does not match the current etag of Secret [{}].",
                        etag, name
                    ),
                )
                .with_resource(name));
            }
        }

        secrets
            .remove(name)
            .map(|s| s.secret)
            .ok_or_else(|| BackendError::not_found(format!("Secret [{}]", name)))
    }
}

#[async_trait]
impl SecretBackend for SecretManagerEmulator {
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        replication: Replication,
        ttl: Option<Duration>,
    ) -> Result<Secret, BackendError> {
        self.create(parent, secret_id, replication, ttl)
    }

    async fn add_secret_version(
        &self,
        secret: &str,
        payload: Bytes,
    ) -> Result<SecretVersion, BackendError> {
        self.add_version(secret, payload)
    }

    async fn list_secrets(
        &self,
        parent: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<SecretPage, BackendError> {
        self.list(parent, filter, page_size, page_token)
    }

    async fn get_secret_version(&self, name: &str) -> Result<SecretVersion, BackendError> {
        self.get_version(name)
    }

    async fn access_secret_version(&self, name: &str) -> Result<Bytes, BackendError> {
        self.access_version(name).map(|(_, payload)| payload)
    }

    async fn delete_secret(&self, name: &str, etag: Option<&str>) -> Result<(), BackendError> {
        self.delete(name, etag).map(|_| ())
    }
}

/// Subset of the Secret Manager list filter syntax.
///
/// Terms are whitespace separated and must all match. `name:<value>` matches
/// when the resource path contains `<value>`; a bare term does the same.
#[derive(Debug, Default)]
struct Filter {
    terms: Vec<String>,
}

impl Filter {
    fn parse(filter: &str) -> Self {
        let terms = filter
            .split_whitespace()
            .map(|term| term.strip_prefix("name:").unwrap_or(term))
            .map(|term| term.trim_matches('"').to_string())
            .filter(|term| !term.is_empty())
            .collect();
        Self { terms }
    }

    fn matches(&self, secret: &Secret) -> bool {
        self.terms.iter().all(|term| secret.name.contains(term.as_str()))
    }
}

fn is_expired(secret: &Secret, now: DateTime<Utc>) -> bool {
    secret.expire_time.is_some_and(|t| t <= now)
}

fn validate_parent(parent: &str) -> Result<(), BackendError> {
    match parent.strip_prefix("projects/") {
        Some(project) if !project.is_empty() && !project.contains('/') => Ok(()),
        _ => Err(BackendError::new(
            ErrorCode::InvalidArgument,
            format!("invalid parent [{}], expected projects/<project>", parent),
        )),
    }
}

fn new_etag() -> String {
    format!("\"{}\"", &Uuid::new_v4().simple().to_string()[..13])
}

fn encode_page_token(last: &str) -> String {
    URL_SAFE_NO_PAD.encode(last.as_bytes())
}

fn decode_page_token(token: &str) -> Result<String, BackendError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| BackendError::new(ErrorCode::InvalidArgument, "invalid page token"))
}

/// State for the emulator's HTTP handlers
pub struct EmulatorState {
    pub storage: Arc<SecretManagerEmulator>,
}

impl EmulatorState {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(SecretManagerEmulator::new()),
        }
    }

    pub fn with_storage(storage: Arc<SecretManagerEmulator>) -> Self {
        Self { storage }
    }
}

impl Default for EmulatorState {
    fn default() -> Self {
        Self::new()
    }
}
