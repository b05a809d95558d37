use std::sync::Arc;

use axum::extract::FromRef;
use common_audit::{AuditModule, AuditWriter};
use common_auth::TokenIssuer;
use common_crypto::SecretCipher;
use sqlx::PgPool;
use tracing::warn;

use crate::config::ServiceConfig;
use crate::metrics::IdentityMetrics;
use crate::oauth::OAuthBroker;
use crate::secrets::{FunctionSecretStore, SecretStore};
use crate::sessions::SessionStore;
use crate::users::Authenticator;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<ServiceConfig>,
    pub cipher: Arc<SecretCipher>,
    pub secrets: SecretStore,
    pub function_secrets: FunctionSecretStore,
    pub authenticator: Authenticator,
    pub broker: Arc<OAuthBroker>,
    pub tokens: Arc<TokenIssuer>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: AuditWriter,
    pub metrics: Arc<IdentityMetrics>,
}

impl FromRef<AppState> for Arc<TokenIssuer> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl FromRef<AppState> for Arc<ServiceConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl AppState {
    /// Record an audit entry for an already-committed mutation. A failed
    /// write is logged and counted but never aborts the operation that
    /// triggered it.
    pub async fn record_audit(
        &self,
        actor: &str,
        action: &str,
        module: AuditModule,
        details: Option<serde_json::Value>,
        ip_address: Option<&str>,
    ) {
        if let Err(err) = self
            .audit
            .try_record(actor, action, module, details, ip_address)
            .await
        {
            self.metrics.audit_write_failure();
            warn!(
                error = %err,
                action,
                module = %module,
                "failed to persist audit record"
            );
        }
    }
}
