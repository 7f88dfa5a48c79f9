//! Storage and lock error taxonomy

use certvault_core::{BackendError, ContextError, ErrorCode};
use thiserror::Error;

/// Errors from storage and lock operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("lock already held: {name}")]
    AlreadyHeld { name: String },

    #[error("unlock called before lock: {name}")]
    NotLocked { name: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(BackendError),

    #[error("transient backend failure: {0}")]
    Transient(BackendError),

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("{reason}")]
    Fatal {
        reason: String,
        #[source]
        last_error: Option<Box<StorageError>>,
    },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
            last_error: None,
        }
    }

    /// Only transient failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Backend status code behind this error, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::PreconditionFailed(e) | Self::Transient(e) | Self::Backend(e) => Some(e.code),
            _ => None,
        }
    }
}

impl From<BackendError> for StorageError {
    fn from(err: BackendError) -> Self {
        match err.code {
            ErrorCode::FailedPrecondition => Self::PreconditionFailed(err),
            code if code.is_transient() => Self::Transient(err),
            _ => Self::Backend(err),
        }
    }
}

impl From<ContextError> for StorageError {
    fn from(err: ContextError) -> Self {
        Self::fatal(err.to_string())
    }
}
