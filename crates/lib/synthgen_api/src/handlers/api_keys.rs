//! API key management request handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{ApiKeyInfo, ApiKeyListResponse, CreateApiKeyRequest, CreateApiKeyResponse};

/// `POST /auth/api-keys`: create a key; the raw secret is in this response
/// only.
pub async fn create_api_key_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<CreateApiKeyRequest>,
) -> AppResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    let issued = state
        .api_keys
        .issue(&user.subject.id, &body.name, body.expires_at)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id: issued.key_id,
            key: issued.raw_secret,
            name: issued.record.name,
            created_at: issued.record.created_at.to_rfc3339(),
            expires_at: issued.record.expires_at.map(|t| t.to_rfc3339()),
        }),
    ))
}

/// `GET /auth/api-keys`: the caller's keys, newest first, without secrets.
pub async fn list_api_keys_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<ApiKeyListResponse>> {
    let keys = state
        .api_keys
        .list(&user.subject.id)
        .await?
        .into_iter()
        .map(ApiKeyInfo::from)
        .collect();
    Ok(Json(ApiKeyListResponse { keys }))
}

/// `DELETE /auth/api-keys/{id}`: deactivate one of the caller's keys.
pub async fn delete_api_key_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(key_id): Path<String>,
) -> AppResult<Json<Value>> {
    state.api_keys.deactivate(&user.subject.id, &key_id).await?;
    Ok(Json(json!({ "success": true })))
}
