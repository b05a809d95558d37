use axum::http::HeaderMap;
use common_http_errors::{ApiError, ApiResult};

use crate::secrets::{SecretStore, API_KEY_SECRET_NAME};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Machine-to-machine gate: constant-time comparison of the `x-api-key`
/// header against the reserved `API_KEY` secret. Passing this gate does not
/// imply any user or admin role.
pub async fn require_api_key(secrets: &SecretStore, headers: &HeaderMap) -> ApiResult<()> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(ApiError::unauthorized)?;

    if secrets.verify(API_KEY_SECRET_NAME, presented).await? {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}

/// Best-effort client address for audit records.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
