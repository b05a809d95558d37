use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common_crypto::SecretCipher;
use common_http_errors::{ApiError, ApiResult};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

/// Name of the reserved secret backing the machine API key.
pub const API_KEY_SECRET_NAME: &str = "API_KEY";

/// Rotated-out rows stay readable-as-inactive for this long before cleanup.
const ROTATION_GRACE_HOURS: i64 = 24;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Freshly generated API keys are `ik_` plus 32 random bytes in hex.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("ik_{}", hex::encode(bytes))
}

#[derive(Debug, Serialize, FromRow)]
pub struct SecretMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "isReserved")]
    pub is_reserved: bool,
    #[serde(rename = "lastUsedAt")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CreateSecretOptions {
    #[serde(rename = "isReserved", default)]
    pub is_reserved: bool,
    #[serde(rename = "expiresAt", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretPatch {
    pub value: Option<String>,
    #[serde(rename = "isActive")]
    pub is_active: Option<bool>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SecretPatch {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.is_active.is_none() && self.expires_at.is_none()
    }
}

/// Named secret material, encrypted at rest.
///
/// The store itself is stateless; uniqueness and rotation atomicity are
/// delegated to the database (partial unique index on `name where is_active`,
/// explicit transactions).
#[derive(Clone)]
pub struct SecretStore {
    pool: PgPool,
    cipher: Arc<SecretCipher>,
}

impl SecretStore {
    pub fn new(pool: PgPool, cipher: Arc<SecretCipher>) -> Self {
        Self { pool, cipher }
    }

    pub async fn create(
        &self,
        name: &str,
        plaintext: &str,
        opts: CreateSecretOptions,
    ) -> ApiResult<Uuid> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::invalid_input("Secret name must not be empty"));
        }

        let ciphertext = self
            .cipher
            .encrypt(plaintext.as_bytes())
            .map_err(ApiError::internal)?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO secrets (id, name, value_ciphertext, is_active, is_reserved, expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(name)
        .bind(&ciphertext)
        .bind(opts.is_reserved)
        .bind(opts.expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::conflict(format!("Secret '{name}' already exists"))
            } else {
                ApiError::internal(err)
            }
        })?;

        Ok(id)
    }

    /// Plaintext of the active, unexpired secret with this name, if any.
    /// Touches `last_used_at`.
    pub async fn get_by_name(&self, name: &str) -> ApiResult<Option<String>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, value_ciphertext FROM secrets
             WHERE name = $1 AND is_active AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some((id, ciphertext)) = row else {
            return Ok(None);
        };

        let plaintext = self.decrypt_value(name, &ciphertext)?;
        self.touch(id).await?;
        Ok(Some(plaintext))
    }

    /// Metadata only; neither ciphertext nor plaintext ever leaves this store
    /// through the listing path.
    pub async fn list(&self) -> ApiResult<Vec<SecretMetadata>> {
        sqlx::query_as::<_, SecretMetadata>(
            "SELECT id, name, is_active, is_reserved, last_used_at, expires_at, created_at
             FROM secrets
             ORDER BY name, created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)
    }

    pub async fn update(&self, id: Uuid, patch: SecretPatch) -> ApiResult<()> {
        if patch.is_empty() {
            return Err(ApiError::invalid_input("Update payload is empty"));
        }

        let reserved = sqlx::query_as::<_, (bool,)>("SELECT is_reserved FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("Secret not found"))?
            .0;
        if reserved {
            return Err(ApiError::forbidden("Reserved secrets cannot be modified"));
        }

        let ciphertext = match &patch.value {
            Some(value) => Some(
                self.cipher
                    .encrypt(value.as_bytes())
                    .map_err(ApiError::internal)?,
            ),
            None => None,
        };

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE secrets SET ");
        {
            let mut separated = builder.separated(", ");
            separated.push("updated_at = ");
            separated.push_bind_unseparated(Utc::now());
            if let Some(ciphertext) = &ciphertext {
                separated.push("value_ciphertext = ");
                separated.push_bind_unseparated(ciphertext);
            }
            if let Some(is_active) = patch.is_active {
                separated.push("is_active = ");
                separated.push_bind_unseparated(is_active);
            }
            if let Some(expires_at) = patch.expires_at {
                separated.push("expires_at = ");
                separated.push_bind_unseparated(expires_at);
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ApiError::conflict("Another active secret already holds this name")
                } else {
                    ApiError::internal(err)
                }
            })?;

        Ok(())
    }

    /// Constant-time comparison of a candidate against the current value.
    /// Mismatch and absence both return `false`; only on success is
    /// `last_used_at` touched.
    pub async fn verify(&self, name: &str, candidate: &str) -> ApiResult<bool> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, value_ciphertext FROM secrets
             WHERE name = $1 AND is_active AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some((id, ciphertext)) = row else {
            return Ok(false);
        };

        let stored = self.decrypt_value(name, &ciphertext)?;
        let matches: bool = stored.as_bytes().ct_eq(candidate.as_bytes()).into();
        if matches {
            self.touch(id).await?;
        }
        Ok(matches)
    }

    /// Replace the active row for a secret within a single transaction: the
    /// old row goes inactive with a 24-hour grace expiry, a new active row is
    /// inserted under the same name.
    pub async fn rotate(&self, id: Uuid, new_plaintext: &str) -> ApiResult<Uuid> {
        let ciphertext = self
            .cipher
            .encrypt(new_plaintext.as_bytes())
            .map_err(ApiError::internal)?;

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT name, is_reserved FROM secrets WHERE id = $1 AND is_active FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        let Some((name, is_reserved)) = row else {
            return Err(ApiError::not_found("Active secret not found"));
        };

        let now = Utc::now();
        sqlx::query(
            "UPDATE secrets SET is_active = FALSE, expires_at = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(now + Duration::hours(ROTATION_GRACE_HOURS))
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        let new_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO secrets (id, name, value_ciphertext, is_active, is_reserved, expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, TRUE, $4, NULL, $5, $6)",
        )
        .bind(new_id)
        .bind(&name)
        .bind(&ciphertext)
        .bind(is_reserved)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(new_id)
    }

    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        let reserved = sqlx::query_as::<_, (bool,)>("SELECT is_reserved FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| ApiError::not_found("Secret not found"))?
            .0;
        if reserved {
            return Err(ApiError::forbidden("Reserved secrets cannot be deleted"));
        }

        sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Remove rows whose expiry is strictly past. Returns the count removed.
    pub async fn cleanup_expired(&self) -> ApiResult<u64> {
        let result =
            sqlx::query("DELETE FROM secrets WHERE expires_at IS NOT NULL AND expires_at < NOW()")
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        Ok(result.rows_affected())
    }

    /// Ensure the reserved `API_KEY` secret exists. Seeds from
    /// `ACCESS_API_KEY` (prefixing `ik_` when missing) or generates a fresh
    /// key. Idempotent across restarts and concurrent boots.
    pub async fn initialize_api_key(&self, seed: Option<&str>) -> ApiResult<()> {
        let existing = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM secrets WHERE name = $1 AND is_active",
        )
        .bind(API_KEY_SECRET_NAME)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        if existing.is_some() {
            return Ok(());
        }

        let value = match seed {
            Some(seed) if seed.starts_with("ik_") => seed.to_string(),
            Some(seed) => format!("ik_{seed}"),
            None => generate_api_key(),
        };

        match self
            .create(
                API_KEY_SECRET_NAME,
                &value,
                CreateSecretOptions {
                    is_reserved: true,
                    expires_at: None,
                },
            )
            .await
        {
            Ok(_) => Ok(()),
            // Another boot won the race; the key exists, which is all we need.
            Err(ApiError::Conflict { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn decrypt_value(&self, name: &str, ciphertext: &str) -> ApiResult<String> {
        let plaintext = self
            .cipher
            .decrypt(ciphertext)
            .map_err(|err| ApiError::cipher_corrupt(format!("secret '{name}': {err}")))?;
        String::from_utf8(plaintext)
            .map_err(|_| ApiError::cipher_corrupt(format!("secret '{name}': not valid UTF-8")))
    }

    async fn touch(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("UPDATE secrets SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct FunctionSecretMetadata {
    pub id: Uuid,
    pub key: String,
    #[serde(rename = "isReserved")]
    pub is_reserved: bool,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Flat env-style secrets injected into function runtimes.
///
/// Keys follow `^[A-Z0-9_]+$`. Unlike [`SecretStore`] there is no rotation
/// or expiry; the key is the identity and upserts replace the value in
/// place.
#[derive(Clone)]
pub struct FunctionSecretStore {
    pool: PgPool,
    cipher: Arc<SecretCipher>,
}

pub fn is_valid_function_secret_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl FunctionSecretStore {
    pub fn new(pool: PgPool, cipher: Arc<SecretCipher>) -> Self {
        Self { pool, cipher }
    }

    /// Insert or replace a function secret. The conflict branch updates only
    /// the ciphertext and timestamp; `is_reserved` is written solely by
    /// internal initialization, and reserved rows reject the update.
    pub async fn upsert(&self, key: &str, plaintext: &str) -> ApiResult<()> {
        if !is_valid_function_secret_key(key) {
            return Err(ApiError::invalid_input(
                "Function secret keys must contain only A-Z, 0-9, and underscores",
            ));
        }

        let ciphertext = self
            .cipher
            .encrypt(plaintext.as_bytes())
            .map_err(ApiError::internal)?;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO function_secrets (id, key, value_ciphertext, is_reserved, created_at, updated_at)
             VALUES ($1, $2, $3, FALSE, $4, $5)
             ON CONFLICT (key) DO UPDATE
             SET value_ciphertext = EXCLUDED.value_ciphertext, updated_at = EXCLUDED.updated_at
             WHERE function_secrets.is_reserved = FALSE",
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(&ciphertext)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::forbidden(
                "Reserved function secrets cannot be modified",
            ));
        }
        Ok(())
    }

    pub async fn list(&self) -> ApiResult<Vec<FunctionSecretMetadata>> {
        sqlx::query_as::<_, FunctionSecretMetadata>(
            "SELECT id, key, is_reserved, updated_at FROM function_secrets ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)
    }

    /// Decrypted key/value pairs for injection into a function runtime
    /// environment. Rows whose ciphertext fails to decrypt are skipped, not
    /// fatal for the batch.
    pub async fn export_env(&self) -> ApiResult<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value_ciphertext FROM function_secrets ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut env = Vec::with_capacity(rows.len());
        for (key, ciphertext) in rows {
            match self.cipher.decrypt(&ciphertext) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(value) => env.push((key, value)),
                    Err(_) => warn!(key = %key, "function secret is not valid UTF-8, skipping"),
                },
                Err(err) => {
                    warn!(key = %key, error = %err, "function secret failed to decrypt, skipping")
                }
            }
        }
        Ok(env)
    }

    pub async fn delete(&self, key: &str) -> ApiResult<()> {
        let reserved = sqlx::query_as::<_, (bool,)>(
            "SELECT is_reserved FROM function_secrets WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("Function secret not found"))?
        .0;
        if reserved {
            return Err(ApiError::forbidden(
                "Reserved function secrets cannot be deleted",
            ));
        }

        sqlx::query("DELETE FROM function_secrets WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }
}
