use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Rows older than this are eligible for retention cleanup.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Actor recorded for internal initialization routines.
pub const SYSTEM_ACTOR: &str = "system";
/// Actor recorded for machine-to-machine calls gated by the API key.
pub const API_KEY_ACTOR: &str = "api-key";

/// Coarse grouping of audited mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditModule {
    Auth,
    Secrets,
    Functions,
    Config,
}

impl AuditModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditModule::Auth => "AUTH",
            AuditModule::Secrets => "SECRETS",
            AuditModule::Functions => "FUNCTIONS",
            AuditModule::Config => "CONFIG",
        }
    }
}

impl std::fmt::Display for AuditModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only row in `audit_log`. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub module: String,
    pub details: Option<serde_json::Value>,
    #[serde(rename = "ipAddress")]
    pub ip_address: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Filter set for querying the audit log. Any subset of the fields may be
/// present; results are ordered newest first.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ModuleCount {
    pub module: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    #[serde(rename = "byModule")]
    pub by_module: Vec<ModuleCount>,
    pub recent: Vec<AuditRecord>,
}
