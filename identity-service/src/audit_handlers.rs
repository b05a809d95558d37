use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_audit::{AuditQuery, AuditRecord, AuditStats};
use common_auth::AdminContext;
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;

use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

#[derive(Deserialize)]
pub struct AuditQueryParams {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct AuditStatsParams {
    pub days: Option<i64>,
}

pub async fn query_audit(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    let query = AuditQuery {
        actor: params.actor,
        action: params.action,
        module: params.module,
        start: params.start,
        end: params.end,
        limit: params
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let records = state
        .audit
        .query(&query)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(records))
}

pub async fn audit_stats(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(params): Query<AuditStatsParams>,
) -> ApiResult<Json<AuditStats>> {
    let days = params.days.unwrap_or(7).clamp(1, 365);
    let stats = state
        .audit
        .stats(days)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(stats))
}
