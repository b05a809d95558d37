use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use common_audit::AuditModule;
use common_auth::{bearer_token, AdminContext, TokenSubject};
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::guards::client_ip;
use crate::users::{Admin, User};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct AdminAuthResponse {
    pub admin: Admin,
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(rename = "userIds")]
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub id: Uuid,
    pub email: String,
    #[serde(rename = "type")]
    pub subject_type: &'static str,
    pub role: &'static str,
}

fn validate_email(email: &str) -> ApiResult<()> {
    let trimmed = email.trim();
    let valid = trimmed
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ApiError::invalid_input("A valid email address is required"))
    }
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::invalid_input(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

pub async fn register_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    let name = payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let user = state
        .authenticator
        .register_user(&payload.email, &payload.password, name)
        .await?;

    let access_token = state
        .tokens
        .issue(&TokenSubject::user(user.id, user.email.clone()))
        .map_err(ApiError::from)?;

    state
        .record_audit(
            &user.email,
            "REGISTER_USER",
            AuditModule::Auth,
            Some(json!({ "userId": user.id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse { user, access_token }),
    ))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state
        .authenticator
        .verify_user(&payload.email, &payload.password)
        .await?;

    let Some(user) = user else {
        state.metrics.login_attempt("rejected");
        return Err(ApiError::unauthorized());
    };

    let access_token = state
        .tokens
        .issue(&TokenSubject::user(user.id, user.email.clone()))
        .map_err(ApiError::from)?;

    state.metrics.login_attempt("success");
    Ok(Json(AuthResponse { user, access_token }))
}

/// Open only while the admin table is empty; afterwards the caller must hold
/// an admin token.
pub async fn register_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<AdminAuthResponse>)> {
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let actor = if state.authenticator.admin_exists().await? {
        let token = bearer_token(&headers).map_err(ApiError::from)?;
        let claims = state.tokens.verify_admin(&token).map_err(ApiError::from)?;
        claims.email
    } else {
        payload.email.trim().to_lowercase()
    };

    let name = payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let admin = state
        .authenticator
        .register_admin(&payload.email, &payload.password, name)
        .await?;

    let access_token = state
        .tokens
        .issue(&TokenSubject::admin(admin.id, admin.email.clone()))
        .map_err(ApiError::from)?;

    state
        .record_audit(
            &actor,
            "REGISTER_ADMIN",
            AuditModule::Auth,
            Some(json!({ "adminId": admin.id })),
            client_ip(&headers).as_deref(),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(AdminAuthResponse {
            admin,
            access_token,
        }),
    ))
}

pub async fn admin_sign_in(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<Json<AdminAuthResponse>> {
    let admin = state
        .authenticator
        .verify_admin(&payload.email, &payload.password)
        .await?;

    let Some(admin) = admin else {
        state.metrics.login_attempt("rejected");
        return Err(ApiError::unauthorized());
    };

    let access_token = state
        .tokens
        .issue(&TokenSubject::admin(admin.id, admin.email.clone()))
        .map_err(ApiError::from)?;

    state.metrics.login_attempt("success");
    Ok(Json(AdminAuthResponse {
        admin,
        access_token,
    }))
}

/// Universal identity endpoint. The bearer may be a session JWT or an opaque
/// session token; the latter is looked up directly in the session store.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<IdentityResponse>> {
    let token = bearer_token(&headers).map_err(ApiError::from)?;

    if let Ok(claims) = state.tokens.verify(&token) {
        return Ok(Json(IdentityResponse {
            id: claims.subject,
            email: claims.email,
            subject_type: claims.subject_type.as_str(),
            role: claims.role.as_str(),
        }));
    }

    if let Some(session) = state.sessions.resolve(&token).await? {
        return Ok(Json(IdentityResponse {
            id: session.id,
            email: session.email,
            subject_type: "user",
            role: "authenticated",
        }));
    }

    Err(ApiError::unauthorized())
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<UserPage>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let (users, total) = state.authenticator.list_users(limit, offset).await?;
    Ok(Json(UserPage {
        users,
        total,
        limit,
        offset,
    }))
}

pub async fn bulk_delete_users(
    State(state): State<AppState>,
    admin: AdminContext,
    headers: HeaderMap,
    Json(payload): Json<BulkDeleteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if payload.user_ids.is_empty() {
        return Err(ApiError::invalid_input("userIds must not be empty"));
    }

    let deleted = state
        .authenticator
        .bulk_delete_users(&payload.user_ids)
        .await?;

    // One record per deleted user: a bulk call is a batch of single-user
    // deletions as far as the audit trail is concerned. Requested ids that
    // matched no row are not deletions and leave no record.
    let ip = client_ip(&headers);
    for user_id in &deleted {
        state
            .record_audit(
                admin.actor(),
                "DELETE_USER",
                AuditModule::Auth,
                Some(json!({ "userId": user_id })),
                ip.as_deref(),
            )
            .await;
    }

    Ok(Json(json!({ "deleted": deleted.len() })))
}
