use async_trait::async_trait;
use common_http_errors::{ApiError, ApiResult};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

/// Identity resolved from an opaque session token.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub id: Uuid,
    pub email: String,
}

/// Narrow seam over the collaborator-owned session table. The `/me` endpoint
/// resolves opaque tokens through this store directly; it never calls back
/// into its own HTTP surface.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn resolve(&self, token: &str) -> ApiResult<Option<SessionIdentity>>;
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn resolve(&self, token: &str) -> ApiResult<Option<SessionIdentity>> {
        // Only a SHA-256 digest of the token is stored.
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));

        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT u.id, u.email
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = $1 AND s.expires_at > NOW()",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(|(id, email)| SessionIdentity { id, email }))
    }
}
