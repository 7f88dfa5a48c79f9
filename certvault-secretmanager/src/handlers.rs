//! HTTP handlers mimicking the Secret Manager v1 REST API

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use certvault_core::{
    project_path, secret_path, version_path,
    wire::{
        parse_duration, AccessSecretVersionResponse, AddSecretVersionRequest,
        ListSecretsResponse, PayloadResource, SecretResource, SecretVersionResource,
    },
    BackendError, ErrorCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::EmulatorState;

/// Build the emulator's router
pub fn router(state: Arc<EmulatorState>) -> Router {
    Router::new()
        .route(
            "/v1/projects/:project/secrets",
            get(handle_list_secrets).post(handle_create_secret),
        )
        .route(
            "/v1/projects/:project/secrets/:secret",
            get(handle_get_secret)
                .post(handle_secret_action)
                .delete(handle_delete_secret),
        )
        .route(
            "/v1/projects/:project/secrets/:secret/versions/:version",
            get(handle_get_version),
        )
        .with_state(state)
}

// === Request types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSecretQuery {
    #[serde(default)]
    secret_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSecretsQuery {
    #[serde(default)]
    filter: String,
    #[serde(default)]
    page_size: u32,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteSecretQuery {
    etag: Option<String>,
}

#[derive(Debug, Serialize)]
struct Empty {}

// === Handlers ===

async fn handle_create_secret(
    State(state): State<Arc<EmulatorState>>,
    Path(project): Path<String>,
    Query(query): Query<CreateSecretQuery>,
    body: Bytes,
) -> Response {
    let resource: SecretResource = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let ttl = match resource.ttl.as_deref().map(parse_duration).transpose() {
        Ok(ttl) => ttl,
        Err(e) => return error_response(&e),
    };

    info!(project = %project, secret_id = %query.secret_id, "CreateSecret");

    match state.storage.create(
        &project_path(&project),
        &query.secret_id,
        resource.replication.into(),
        ttl,
    ) {
        Ok(secret) => json_response(StatusCode::OK, &SecretResource::from(&secret)),
        Err(e) => error_response(&e),
    }
}

async fn handle_list_secrets(
    State(state): State<Arc<EmulatorState>>,
    Path(project): Path<String>,
    Query(query): Query<ListSecretsQuery>,
) -> Response {
    debug!(project = %project, filter = %query.filter, "ListSecrets");

    match state.storage.list(
        &project_path(&project),
        &query.filter,
        query.page_size,
        query.page_token.as_deref().filter(|t| !t.is_empty()),
    ) {
        Ok(page) => {
            let response = ListSecretsResponse {
                total_size: page.secrets.len(),
                secrets: page.secrets.iter().map(SecretResource::from).collect(),
                next_page_token: page.next_page_token,
            };
            json_response(StatusCode::OK, &response)
        }
        Err(e) => error_response(&e),
    }
}

async fn handle_get_secret(
    State(state): State<Arc<EmulatorState>>,
    Path((project, secret)): Path<(String, String)>,
) -> Response {
    let name = secret_path(&project_path(&project), &secret);

    match state.storage.get_secret(&name) {
        Ok(secret) => json_response(StatusCode::OK, &SecretResource::from(&secret)),
        Err(e) => error_response(&e),
    }
}

/// `POST .../secrets/{id}:addVersion`
async fn handle_secret_action(
    State(state): State<Arc<EmulatorState>>,
    Path((project, secret)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let Some(secret_id) = secret.strip_suffix(":addVersion") else {
        return error_response(&BackendError::new(
            ErrorCode::NotFound,
            format!("unknown method on secret [{}]", secret),
        ));
    };

    let request: AddSecretVersionRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let payload = match request.payload.decode() {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let name = secret_path(&project_path(&project), secret_id);
    info!(secret = %name, bytes = payload.len(), "AddSecretVersion");

    match state.storage.add_version(&name, payload.into()) {
        Ok(version) => json_response(StatusCode::OK, &SecretVersionResource::from(&version)),
        Err(e) => error_response(&e),
    }
}

async fn handle_delete_secret(
    State(state): State<Arc<EmulatorState>>,
    Path((project, secret)): Path<(String, String)>,
    Query(query): Query<DeleteSecretQuery>,
) -> Response {
    let name = secret_path(&project_path(&project), &secret);
    info!(secret = %name, etag = ?query.etag, "DeleteSecret");

    match state.storage.delete(&name, query.etag.as_deref()) {
        Ok(_) => json_response(StatusCode::OK, &Empty {}),
        Err(e) => error_response(&e),
    }
}

/// `GET .../versions/{version}` and `GET .../versions/{version}:access`
async fn handle_get_version(
    State(state): State<Arc<EmulatorState>>,
    Path((project, secret, version)): Path<(String, String, String)>,
) -> Response {
    let secret = secret_path(&project_path(&project), &secret);

    match version.strip_suffix(":access") {
        Some(version) => {
            let name = version_path(&secret, version);
            debug!(version = %name, "AccessSecretVersion");

            match state.storage.access_version(&name) {
                Ok((version, payload)) => {
                    let response = AccessSecretVersionResponse {
                        name: version.name,
                        payload: PayloadResource::encode(&payload),
                    };
                    json_response(StatusCode::OK, &response)
                }
                Err(e) => error_response(&e),
            }
        }
        None => {
            let name = version_path(&secret, &version);
            debug!(version = %name, "GetSecretVersion");

            match state.storage.get_version(&name) {
                Ok(version) => {
                    json_response(StatusCode::OK, &SecretVersionResource::from(&version))
                }
                Err(e) => error_response(&e),
            }
        }
    }
}

// === Helpers ===

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(body)
        .map_err(|e| BackendError::new(ErrorCode::InvalidArgument, e.to_string()))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(json) => (status, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => error_response(&BackendError::new(ErrorCode::Internal, e.to_string())),
    }
}

fn error_response(error: &BackendError) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        error.to_json(),
    )
        .into_response()
}
