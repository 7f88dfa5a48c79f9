//! Secret Manager v1 REST client

use async_trait::async_trait;
use bytes::Bytes;
use certvault_core::wire::{
    format_duration, AccessSecretVersionResponse, AddSecretVersionRequest, ListSecretsResponse,
    PayloadResource, SecretResource, SecretVersionResource,
};
use certvault_core::{
    BackendError, ErrorCode, Replication, Secret, SecretBackend, SecretPage, SecretVersion,
};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use super::auth::{AuthError, ServiceAccountKey, TokenSource};
use crate::config::{Config, ConfigError};

/// [`SecretBackend`] speaking to the Secret Manager REST API or a compatible emulator
#[derive(Debug)]
pub struct HttpSecretBackend {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenSource,
}

impl HttpSecretBackend {
    pub fn new(endpoint: impl Into<String>, tokens: TokenSource, timeout: Duration) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Build a client from configuration.
    ///
    /// A credentials file takes precedence over a static access token; with
    /// neither, requests go out unauthenticated.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let tokens = match (&config.credentials_file, &config.access_token) {
            (Some(path), _) => {
                let key = ServiceAccountKey::from_file(path).map_err(|e| match e {
                    AuthError::Io(source) => ConfigError::CredentialsFile {
                        path: path.clone(),
                        source,
                    },
                    AuthError::Json(source) => ConfigError::InvalidJson {
                        path: path.clone(),
                        source,
                    },
                    other => ConfigError::Client(other.to_string()),
                })?;
                TokenSource::service_account(key)
            }
            (None, Some(token)) => TokenSource::Static(token.clone()),
            (None, None) => TokenSource::Anonymous,
        };

        Self::new(config.endpoint.clone(), tokens, config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        let builder = self.http.request(method, self.url(path));

        match self.tokens.token(&self.http).await {
            Ok(Some(token)) => Ok(builder.bearer_auth(token)),
            Ok(None) => Ok(builder),
            Err(e) => Err(BackendError::new(ErrorCode::Unauthenticated, e.to_string())),
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        trace!(status = %status, bytes = body.len(), "secret manager response");

        if !status.is_success() {
            return Err(BackendError::from_response(status.as_u16(), &body));
        }

        serde_json::from_slice(&body).map_err(|e| {
            BackendError::new(
                ErrorCode::Internal,
                format!("unexpected response body: {}", e),
            )
        })
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    let code = if error.is_timeout() {
        ErrorCode::DeadlineExceeded
    } else {
        ErrorCode::Unavailable
    };
    BackendError::new(code, error.to_string())
}

#[async_trait]
impl SecretBackend for HttpSecretBackend {
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        replication: Replication,
        ttl: Option<Duration>,
    ) -> Result<Secret, BackendError> {
        debug!(parent = %parent, secret_id = %secret_id, "CreateSecret");

        let body = SecretResource {
            replication: (&replication).into(),
            ttl: ttl.map(format_duration),
            ..Default::default()
        };

        let request = self
            .request(Method::POST, &format!("{}/secrets", parent))
            .await?
            .query(&[("secretId", secret_id)])
            .json(&body);

        let resource: SecretResource = self.send(request).await?;
        Ok(resource.into())
    }

    async fn add_secret_version(
        &self,
        secret: &str,
        payload: Bytes,
    ) -> Result<SecretVersion, BackendError> {
        debug!(secret = %secret, bytes = payload.len(), "AddSecretVersion");

        let body = AddSecretVersionRequest {
            payload: PayloadResource::encode(&payload),
        };

        let request = self
            .request(Method::POST, &format!("{}:addVersion", secret))
            .await?
            .json(&body);

        let resource: SecretVersionResource = self.send(request).await?;
        Ok(resource.into())
    }

    async fn list_secrets(
        &self,
        parent: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<SecretPage, BackendError> {
        debug!(parent = %parent, filter = %filter, page_token = ?page_token, "ListSecrets");

        let mut query = vec![("pageSize", page_size.to_string())];
        if !filter.is_empty() {
            query.push(("filter", filter.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let request = self
            .request(Method::GET, &format!("{}/secrets", parent))
            .await?
            .query(&query);

        let response: ListSecretsResponse = self.send(request).await?;
        Ok(response.into())
    }

    async fn get_secret_version(&self, name: &str) -> Result<SecretVersion, BackendError> {
        debug!(name = %name, "GetSecretVersion");

        let request = self.request(Method::GET, name).await?;
        let resource: SecretVersionResource = self.send(request).await?;
        Ok(resource.into())
    }

    async fn access_secret_version(&self, name: &str) -> Result<Bytes, BackendError> {
        debug!(name = %name, "AccessSecretVersion");

        let request = self.request(Method::GET, &format!("{}:access", name)).await?;
        let response: AccessSecretVersionResponse = self.send(request).await?;
        Ok(Bytes::from(response.payload.decode()?))
    }

    async fn delete_secret(&self, name: &str, etag: Option<&str>) -> Result<(), BackendError> {
        debug!(name = %name, etag = ?etag, "DeleteSecret");

        let mut request = self.request(Method::DELETE, name).await?;
        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            request = request.query(&[("etag", etag)]);
        }

        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let backend = HttpSecretBackend::new(
            "http://localhost:8085/",
            TokenSource::Anonymous,
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(backend.endpoint(), "http://localhost:8085");
        assert_eq!(
            backend.url("projects/p/secrets/a:addVersion"),
            "http://localhost:8085/v1/projects/p/secrets/a:addVersion"
        );
    }

    #[test]
    fn test_from_config_picks_token_source() {
        let config = Config {
            access_token: Some("tok".into()),
            ..Config::new("p")
        };
        let backend = HttpSecretBackend::from_config(&config).unwrap();
        assert!(matches!(backend.tokens, TokenSource::Static(ref t) if t == "tok"));

        let backend = HttpSecretBackend::from_config(&Config::new("p")).unwrap();
        assert!(matches!(backend.tokens, TokenSource::Anonymous));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let backend = HttpSecretBackend::new(
            "http://127.0.0.1:1",
            TokenSource::Anonymous,
            Duration::from_secs(2),
        )
        .unwrap();

        let err = backend
            .get_secret_version("projects/p/secrets/a/versions/latest")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
