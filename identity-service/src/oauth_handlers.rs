use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use common_audit::{AuditModule, SYSTEM_ACTOR};
use common_auth::{AdminContext, TokenSubject};
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::guards::client_ip;
use crate::oauth::{ProviderConfigUpdate, StoredProviderConfig};
use crate::user_handlers::AuthResponse;
use crate::AppState;

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_uri: Option<String>,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "authUrl")]
    pub auth_url: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

pub async fn authorize(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<Json<AuthorizeResponse>> {
    let auth_url = state
        .broker
        .begin_authorization(&provider, query.redirect_uri)?;
    Ok(Json(AuthorizeResponse { auth_url }))
}

/// Terminal leg of the OAuth exchange. Both outcomes leave an audit record;
/// only the success path links a binding and mints a token.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<AuthResponse>> {
    let ip = client_ip(&headers);

    let identity = match state
        .broker
        .complete_authorization(&provider, &query.code, &query.state)
        .await
    {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics.oauth_exchange(&provider, "failed");
            state
                .record_audit(
                    SYSTEM_ACTOR,
                    "OAUTH_LOGIN_FAILED",
                    AuditModule::Auth,
                    Some(json!({ "provider": provider, "error": err.kind() })),
                    ip.as_deref(),
                )
                .await;
            return Err(err);
        }
    };

    let user = state.authenticator.link_oauth_binding(&identity).await?;
    let access_token = state
        .tokens
        .issue(&TokenSubject::user(user.id, user.email.clone()))
        .map_err(ApiError::from)?;

    state.metrics.oauth_exchange(&provider, "success");
    state
        .record_audit(
            &user.email,
            "OAUTH_LOGIN",
            AuditModule::Auth,
            Some(json!({ "provider": provider, "userId": user.id })),
            ip.as_deref(),
        )
        .await;

    Ok(Json(AuthResponse { user, access_token }))
}

pub async fn reload_providers(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    state.broker.reload().await?;

    state
        .record_audit(
            admin.actor(),
            "RELOAD_OAUTH_PROVIDERS",
            AuditModule::Config,
            None,
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "reloaded": true })))
}

#[derive(Serialize)]
pub struct ProviderConfigView {
    pub provider: String,
    #[serde(flatten)]
    pub config: StoredProviderConfig,
}

pub async fn list_providers(
    State(state): State<AppState>,
    _admin: AdminContext,
) -> ApiResult<Json<Vec<ProviderConfigView>>> {
    let configs = state
        .broker
        .masked_configs()
        .await?
        .into_iter()
        .map(|(provider, config)| ProviderConfigView { provider, config })
        .collect();
    Ok(Json(configs))
}

pub async fn update_provider(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Json(update): Json<ProviderConfigUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    state.broker.update_provider(&provider, update).await?;

    state
        .record_audit(
            admin.actor(),
            "SET_OAUTH_PROVIDER",
            AuditModule::Config,
            Some(json!({ "provider": provider })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok(Json(json!({ "provider": provider })))
}
