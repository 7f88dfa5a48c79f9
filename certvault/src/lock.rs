//! Advisory locks modelled as `lock-<name>` secrets.
//!
//! A lock is held while the secret `lock-<name>` exists. Acquiring checks for
//! the secret first and then creates it, which leaves a window where two
//! processes both see it absent. Exclusion comes from the backend rejecting
//! the second create with `AlreadyExists`; the local check only saves a
//! round trip. A holder that dies leaves its secret to expire after
//! [`FIXED_TTL`](crate::storage::FIXED_TTL); locks are never renewed.

use certvault_core::{secret_path, version_path, ErrorCode, OpContext, LATEST_VERSION};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::resolver::remote;
use crate::retry::retry;
use crate::storage::{SecretManagerStorage, FIXED_TTL};

/// Payload of a lock secret
const LOCK_MARKER: &[u8] = b"true";

/// Key of the secret backing lock `name`
pub fn lock_key(name: &str) -> String {
    format!("lock-{}", name)
}

/// Locks this process believes it holds.
///
/// Guards against double acquire and unlock-without-lock within one process;
/// it says nothing about other processes.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }

    /// Returns false if `name` was already marked
    pub fn mark_held(&self, name: &str) -> bool {
        self.held.lock().insert(name.to_string())
    }

    pub fn release(&self, name: &str) -> bool {
        self.held.lock().remove(name)
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretManagerStorage {
    /// Whether this instance holds lock `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks.is_held(name)
    }

    /// Number of locks held by this instance
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    pub(crate) async fn acquire(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError> {
        if self.locks.is_held(name) {
            return Err(StorageError::AlreadyHeld {
                name: name.to_string(),
            });
        }

        let key = lock_key(name);
        let key = key.as_str();

        match self.resolver.find_key(ctx, key).await {
            Ok(_) => {
                return Err(StorageError::AlreadyHeld {
                    name: name.to_string(),
                })
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let secret = retry(ctx, &self.retry, "lock", move || {
            self.create_secret(ctx, key, FIXED_TTL)
        })
        .await
        .map_err(|e| match e.code() {
            Some(ErrorCode::AlreadyExists) => StorageError::AlreadyHeld {
                name: name.to_string(),
            },
            _ => e,
        })?;

        let secret = &secret;
        if let Err(e) = retry(ctx, &self.retry, "lock", move || {
            self.add_version(ctx, key, secret, LOCK_MARKER)
        })
        .await
        {
            // A lock secret without versions cannot be loaded; take it back down.
            if let Err(cleanup) = remote(
                ctx,
                self.resolver
                    .backend()
                    .delete_secret(&secret.name, Some(&secret.etag)),
            )
            .await
            {
                warn!(lock = %name, error = %cleanup, "failed to remove lock secret without marker");
            }
            return Err(e);
        }

        self.locks.mark_held(name);
        info!(lock = %name, secret = %secret.name, "lock acquired");
        Ok(())
    }

    pub(crate) async fn release(&self, ctx: &OpContext, name: &str) -> Result<(), StorageError> {
        if !self.locks.is_held(name) {
            return Err(StorageError::NotLocked {
                name: name.to_string(),
            });
        }

        let key = lock_key(name);
        let key = key.as_str();

        match retry(ctx, &self.retry, "unlock", move || self.delete_resolved(ctx, key)).await {
            Ok(()) => {}
            // The listing can lag behind the create, so a miss only counts as
            // released once the secret is confirmed gone by path.
            Err(e @ StorageError::NotFound { .. }) => {
                if !self.confirm_absent(ctx, key).await? {
                    warn!(lock = %name, "lock secret exists but is not listed yet");
                    return Err(e);
                }
                warn!(lock = %name, "lock secret already gone, it likely expired");
            }
            Err(e) => return Err(e),
        }

        self.locks.release(name);
        info!(lock = %name, "lock released");
        Ok(())
    }

    /// Whether the secret for `key` is gone, read directly rather than listed
    async fn confirm_absent(&self, ctx: &OpContext, key: &str) -> Result<bool, StorageError> {
        let latest = version_path(&secret_path(self.parent(), key), LATEST_VERSION);

        match remote(ctx, self.resolver.backend().get_secret_version(&latest)).await {
            Ok(_) => Ok(false),
            Err(e) if e.code() == Some(ErrorCode::NotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }
}
