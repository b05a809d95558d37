use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use common_audit::AuditModule;
use common_auth::AdminContext;
use common_http_errors::ApiResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::guards::{client_ip, require_api_key};
use crate::secrets::{CreateSecretOptions, FunctionSecretMetadata, SecretMetadata, SecretPatch};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub options: CreateSecretOptions,
}

#[derive(Serialize)]
pub struct SecretCreated {
    pub id: Uuid,
}

#[derive(Deserialize)]
pub struct RotateSecretRequest {
    pub value: String,
}

#[derive(Deserialize)]
pub struct SetFunctionSecretRequest {
    pub key: String,
    pub value: String,
}

pub async fn list_secrets(
    State(state): State<AppState>,
    _admin: AdminContext,
) -> ApiResult<Json<Vec<SecretMetadata>>> {
    Ok(Json(state.secrets.list().await?))
}

pub async fn create_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Json(payload): Json<CreateSecretRequest>,
) -> ApiResult<(StatusCode, Json<SecretCreated>)> {
    let id = state
        .secrets
        .create(&payload.name, &payload.value, payload.options)
        .await?;

    state
        .record_audit(
            admin.actor(),
            "CREATE_SECRET",
            AuditModule::Secrets,
            Some(json!({ "name": payload.name.trim(), "secretId": id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok((StatusCode::CREATED, Json(SecretCreated { id })))
}

pub async fn update_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<SecretPatch>,
) -> ApiResult<Json<serde_json::Value>> {
    state.secrets.update(id, patch).await?;

    state
        .record_audit(
            admin.actor(),
            "UPDATE_SECRET",
            AuditModule::Secrets,
            Some(json!({ "secretId": id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "updated": true })))
}

pub async fn rotate_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<RotateSecretRequest>,
) -> ApiResult<Json<SecretCreated>> {
    let new_id = state.secrets.rotate(id, &payload.value).await?;

    state
        .record_audit(
            admin.actor(),
            "ROTATE_SECRET",
            AuditModule::Secrets,
            Some(json!({ "secretId": id, "newSecretId": new_id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(SecretCreated { id: new_id }))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.secrets.delete(id).await?;

    state
        .record_audit(
            admin.actor(),
            "DELETE_SECRET",
            AuditModule::Secrets,
            Some(json!({ "secretId": id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "deleted": true })))
}

pub async fn list_function_secrets(
    State(state): State<AppState>,
    _admin: AdminContext,
) -> ApiResult<Json<Vec<FunctionSecretMetadata>>> {
    Ok(Json(state.function_secrets.list().await?))
}

pub async fn set_function_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Json(payload): Json<SetFunctionSecretRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .function_secrets
        .upsert(&payload.key, &payload.value)
        .await?;

    state
        .record_audit(
            admin.actor(),
            "SET_FUNCTION_SECRET",
            AuditModule::Functions,
            Some(json!({ "key": payload.key })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "key": payload.key })))
}

pub async fn delete_function_secret(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.function_secrets.delete(&key).await?;

    state
        .record_audit(
            admin.actor(),
            "DELETE_FUNCTION_SECRET",
            AuditModule::Functions,
            Some(json!({ "key": key })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "deleted": true })))
}

/// Machine endpoint for the function runtime: decrypted env pairs, gated by
/// the reserved API key rather than a session token.
pub async fn function_runtime_env(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_key(&state.secrets, &headers).await?;

    let env = state.function_secrets.export_env().await?;
    let map: serde_json::Map<String, serde_json::Value> = env
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect();

    Ok(Json(serde_json::Value::Object(map)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_accepts_flattened_options() {
        let payload: CreateSecretRequest = serde_json::from_str(
            r#"{ "name": "S", "value": "v1", "isReserved": false, "expiresAt": null }"#,
        )
        .unwrap();
        assert_eq!(payload.name, "S");
        assert!(!payload.options.is_reserved);
        assert!(payload.options.expires_at.is_none());
    }

    #[test]
    fn rotate_request_shape() {
        let payload: RotateSecretRequest = serde_json::from_str(r#"{ "value": "v2" }"#).unwrap();
        assert_eq!(payload.value, "v2");
    }
}
