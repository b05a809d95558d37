use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::model::{AuditModule, AuditQuery, AuditRecord, AuditStats, ModuleCount};

/// Append-only writer and query surface over `audit_log`.
///
/// Callers emit records strictly after the originating mutation has
/// committed; a failed insert must never abort that operation, so the
/// service wraps [`try_record`](Self::try_record) with a warn-and-continue
/// helper.
#[derive(Clone)]
pub struct AuditWriter {
    pool: PgPool,
}

impl AuditWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn try_record(
        &self,
        actor: &str,
        action: &str,
        module: AuditModule,
        details: Option<serde_json::Value>,
        ip_address: Option<&str>,
    ) -> Result<AuditRecord, sqlx::Error> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            module: module.as_str().to_string(),
            details,
            ip_address: ip_address.map(|value| value.to_string()),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO audit_log (id, actor, action, module, details, ip_address, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(&record.actor)
        .bind(&record.action)
        .bind(&record.module)
        .bind(&record.details)
        .bind(&record.ip_address)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, actor, action, module, details, ip_address, created_at
             FROM audit_log WHERE TRUE",
        );
        if let Some(actor) = &query.actor {
            builder.push(" AND actor = ").push_bind(actor);
        }
        if let Some(action) = &query.action {
            builder.push(" AND action = ").push_bind(action);
        }
        if let Some(module) = &query.module {
            builder.push(" AND module = ").push_bind(module);
        }
        if let Some(start) = query.start {
            builder.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = query.end {
            builder.push(" AND created_at <= ").push_bind(end);
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(query.limit.max(1));
        builder.push(" OFFSET ");
        builder.push_bind(query.offset.max(0));

        builder
            .build_query_as::<AuditRecord>()
            .fetch_all(&self.pool)
            .await
    }

    /// Per-module counts over the last `days` days, plus the ten most recent
    /// records in that window.
    pub async fn stats(&self, days: i64) -> Result<AuditStats, sqlx::Error> {
        let cutoff = Utc::now() - Duration::days(days.max(1));

        let by_module = sqlx::query_as::<_, ModuleCount>(
            "SELECT module, COUNT(*) AS count FROM audit_log
             WHERE created_at >= $1
             GROUP BY module
             ORDER BY count DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let recent = sqlx::query_as::<_, AuditRecord>(
            "SELECT id, actor, action, module, details, ip_address, created_at
             FROM audit_log
             WHERE created_at >= $1
             ORDER BY created_at DESC
             LIMIT 10",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditStats { by_module, recent })
    }

    /// Hard-delete records older than `older_than_days`. Returns the number
    /// of rows removed.
    pub async fn cleanup(&self, older_than_days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - Duration::days(older_than_days.max(1));
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
