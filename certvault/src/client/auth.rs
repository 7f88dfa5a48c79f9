//! OAuth access tokens for the Secret Manager API

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Minted tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to read service account key: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid service account key: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unable to sign token request: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Fields of a service account JSON key used for token minting
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Signed JWT assertion for the token endpoint
    pub fn assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let claims = Claims {
            iss: &self.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// A minted token and when to replace it
#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Where request bearer tokens come from
#[derive(Debug)]
pub enum TokenSource {
    /// Send requests unauthenticated (emulators)
    Anonymous,
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn service_account(key: ServiceAccountKey) -> Self {
        Self::ServiceAccount {
            key,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, minting a new one when the cached token is near expiry
    pub async fn token(&self, http: &reqwest::Client) -> Result<Option<String>, AuthError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::ServiceAccount { key, cached } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Instant::now()) {
                    return Ok(Some(token.value.clone()));
                }

                let token = mint(http, key).await?;
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
        }
    }
}

async fn mint(http: &reqwest::Client, key: &ServiceAccountKey) -> Result<CachedToken, AuthError> {
    let assertion = key.assertion(Utc::now().timestamp())?;
    debug!(client_email = %key.client_email, token_uri = %key.token_uri, "minting access token");

    let response = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }

    let token: TokenResponse = response.json().await?;
    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);

    Ok(CachedToken {
        value: token.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}
