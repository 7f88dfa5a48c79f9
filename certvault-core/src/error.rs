//! Secret Manager error types and formatting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical status codes returned by the secret backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    OutOfRange,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Aborted,
    AlreadyExists,
    ResourceExhausted,
    Cancelled,
    Internal,
    Unavailable,
    DeadlineExceeded,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Aborted => "ABORTED",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse the `status` field of a Google API error body
    pub fn from_status(status: &str) -> Self {
        match status {
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "FAILED_PRECONDITION" => Self::FailedPrecondition,
            "OUT_OF_RANGE" => Self::OutOfRange,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "NOT_FOUND" => Self::NotFound,
            "ABORTED" => Self::Aborted,
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "CANCELLED" => Self::Cancelled,
            "INTERNAL" => Self::Internal,
            "UNAVAILABLE" => Self::Unavailable,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            _ => Self::Unknown,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => 400,
            Self::Unauthenticated => 401,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::Aborted | Self::AlreadyExists => 409,
            Self::ResourceExhausted => 429,
            Self::Cancelled => 499,
            Self::Internal | Self::Unknown => 500,
            Self::Unavailable => 503,
            Self::DeadlineExceeded => 504,
        }
    }

    /// Best guess when a response carries no parseable error body
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            412 => Self::FailedPrecondition,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            502 | 503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::Internal,
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::DeadlineExceeded
                | Self::Internal
                | Self::ResourceExhausted
                | Self::Aborted
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a secret backend
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
    pub resource: Option<String>,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorCode::NotFound, format!("{} not found or has no versions", resource))
            .with_resource(resource)
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }

    /// Format as a Google API JSON error body
    pub fn to_json(&self) -> String {
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code.http_status(),
                message: self.message.clone(),
                status: self.code.as_str().to_string(),
            },
        };

        serde_json::to_string(&envelope).unwrap_or_else(|_| {
            format!(
                r#"{{"error":{{"code":{},"message":"{}","status":"{}"}}}}"#,
                self.code.http_status(),
                self.message,
                self.code.as_str()
            )
        })
    }

    /// Parse a Google API JSON error body, falling back to the HTTP status
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let code = match ErrorCode::from_status(&envelope.error.status) {
                    ErrorCode::Unknown => ErrorCode::from_http_status(envelope.error.code),
                    code => code,
                };
                Self::new(code, envelope.error.message)
            }
            Err(_) => Self::new(
                ErrorCode::from_http_status(status),
                String::from_utf8_lossy(body).into_owned(),
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_format() {
        let error = BackendError::new(ErrorCode::NotFound, "Secret [projects/p/secrets/a] not found");

        let json = error.to_json();
        assert!(json.contains("\"status\":\"NOT_FOUND\""));
        assert!(json.contains("\"code\":404"));
        assert!(json.contains("projects/p/secrets/a"));
    }

    #[test]
    fn test_error_from_response_prefers_status() {
        let body = br#"{"error":{"code":400,"message":"etag mismatch","status":"FAILED_PRECONDITION"}}"#;

        let error = BackendError::from_response(400, body);
        assert_eq!(error.code, ErrorCode::FailedPrecondition);
        assert_eq!(error.message, "etag mismatch");
    }

    #[test]
    fn test_error_from_unparseable_response() {
        let error = BackendError::from_response(503, b"upstream connect error");
        assert_eq!(error.code, ErrorCode::Unavailable);
        assert!(error.is_transient());
    }

    #[test]
    fn test_transient_codes() {
        assert!(ErrorCode::Unavailable.is_transient());
        assert!(ErrorCode::Internal.is_transient());
        assert!(!ErrorCode::AlreadyExists.is_transient());
        assert!(!ErrorCode::FailedPrecondition.is_transient());
        assert!(!ErrorCode::NotFound.is_transient());
    }
}
