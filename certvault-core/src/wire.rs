//! JSON shapes of the Secret Manager v1 REST API

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::backend::{Replication, Secret, SecretPage, SecretVersion};
use crate::error::{BackendError, ErrorCode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub replication: ReplicationResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
    /// Input only, e.g. `"60s"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_managed: Option<UserManagedResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserManagedResource {
    #[serde(default)]
    pub replicas: Vec<ReplicaResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaResource {
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVersionResource {
    pub name: String,
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSecretsResponse {
    #[serde(default)]
    pub secrets: Vec<SecretResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub total_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayloadResource {
    /// Base64 encoded bytes
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddSecretVersionRequest {
    pub payload: PayloadResource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessSecretVersionResponse {
    pub name: String,
    pub payload: PayloadResource,
}

impl From<&Replication> for ReplicationResource {
    fn from(replication: &Replication) -> Self {
        match replication {
            Replication::Automatic => Self {
                automatic: Some(HashMap::new()),
                user_managed: None,
            },
            Replication::UserManaged { locations } => Self {
                automatic: None,
                user_managed: Some(UserManagedResource {
                    replicas: locations
                        .iter()
                        .map(|l| ReplicaResource { location: l.clone() })
                        .collect(),
                }),
            },
        }
    }
}

impl From<ReplicationResource> for Replication {
    fn from(resource: ReplicationResource) -> Self {
        match resource.user_managed {
            Some(managed) => Replication::UserManaged {
                locations: managed.replicas.into_iter().map(|r| r.location).collect(),
            },
            None => Replication::Automatic,
        }
    }
}

impl From<&Secret> for SecretResource {
    fn from(secret: &Secret) -> Self {
        Self {
            name: secret.name.clone(),
            replication: (&secret.replication).into(),
            create_time: Some(secret.create_time),
            expire_time: secret.expire_time,
            ttl: None,
            etag: secret.etag.clone(),
        }
    }
}

impl From<SecretResource> for Secret {
    fn from(resource: SecretResource) -> Self {
        Self {
            name: resource.name,
            replication: resource.replication.into(),
            create_time: resource.create_time.unwrap_or_default(),
            expire_time: resource.expire_time,
            etag: resource.etag,
        }
    }
}

impl From<&SecretVersion> for SecretVersionResource {
    fn from(version: &SecretVersion) -> Self {
        Self {
            name: version.name.clone(),
            create_time: Some(version.create_time),
            etag: version.etag.clone(),
            state: "ENABLED".to_string(),
        }
    }
}

impl From<SecretVersionResource> for SecretVersion {
    fn from(resource: SecretVersionResource) -> Self {
        Self {
            name: resource.name,
            create_time: resource.create_time.unwrap_or_default(),
            etag: resource.etag,
        }
    }
}

impl From<ListSecretsResponse> for SecretPage {
    fn from(response: ListSecretsResponse) -> Self {
        Self {
            secrets: response.secrets.into_iter().map(Secret::from).collect(),
            next_page_token: response.next_page_token,
        }
    }
}

impl PayloadResource {
    pub fn encode(data: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, BackendError> {
        STANDARD.decode(&self.data).map_err(|e| {
            BackendError::new(
                ErrorCode::InvalidArgument,
                format!("payload is not valid base64: {}", e),
            )
        })
    }
}

/// Render a duration in the protobuf JSON form (`"60s"`)
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}s", duration.as_secs_f64())
    }
}

/// Parse a protobuf JSON duration (`"60s"`, `"1.5s"`)
pub fn parse_duration(value: &str) -> Result<Duration, BackendError> {
    value
        .strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            BackendError::new(
                ErrorCode::InvalidArgument,
                format!("invalid duration '{}'", value),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        assert_eq!(format_duration(Duration::from_secs(60)), "60s");
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("60").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1e300s").is_err());
        assert!(parse_duration("NaNs").is_err());
    }

    #[test]
    fn test_secret_resource_shape() {
        let resource = SecretResource {
            replication: (&Replication::Automatic).into(),
            ttl: Some(format_duration(Duration::from_secs(60))),
            ..Default::default()
        };

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["replication"]["automatic"], serde_json::json!({}));
        assert_eq!(json["ttl"], "60s");
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_list_response_parses_google_shape() {
        let body = r#"{
            "secrets": [{
                "name": "projects/p/secrets/a",
                "replication": {"automatic": {}},
                "createTime": "2024-03-01T10:00:00.123456Z",
                "etag": "\"16127a1b\""
            }],
            "nextPageToken": "abc",
            "totalSize": 2
        }"#;

        let page: SecretPage = serde_json::from_str::<ListSecretsResponse>(body).unwrap().into();
        assert_eq!(page.secrets.len(), 1);
        assert_eq!(page.secrets[0].name, "projects/p/secrets/a");
        assert_eq!(page.secrets[0].etag, "\"16127a1b\"");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_payload_encoding() {
        let payload = PayloadResource::encode(b"-----BEGIN CERTIFICATE-----");
        assert_eq!(payload.decode().unwrap(), b"-----BEGIN CERTIFICATE-----");
        assert!(PayloadResource { data: "%%%".into() }.decode().is_err());
    }
}
