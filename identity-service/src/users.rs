use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use common_http_errors::{ApiError, ApiResult};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// Verified against whenever the email lookup misses, so the hash-comparison
// cost is paid on every login attempt regardless of whether the account
// exists.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"timing-equalizer", &salt)
        .expect("hashing a static password cannot fail")
        .to_string()
});

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Admin {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct UserAuthRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    password_hash: Option<String>,
}

impl UserAuthRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            email_verified: self.email_verified,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AdminAuthRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    password_hash: String,
}

impl AdminAuthRow {
    fn into_admin(self) -> Admin {
        Admin {
            id: self.id,
            email: self.email,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

/// Profile data carried back from an OAuth provider when linking a binding.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub name: Option<String>,
    pub profile: serde_json::Value,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// User and admin registration, credential verification, and OAuth binding
/// linkage. Users and admins are parallel namespaces backed by separate
/// tables; they never share rows even when they share an email.
#[derive(Clone)]
pub struct Authenticator {
    pool: PgPool,
}

impl Authenticator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> ApiResult<User> {
        let normalized = normalize_email(email);
        let password_hash = hash_password(password)?;
        let now = Utc::now();

        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, password_hash, name, email_verified, created_at, updated_at)
             VALUES ($1, $2, $3, $4, FALSE, $5, $6)
             RETURNING id, email, name, email_verified, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&normalized)
        .bind(&password_hash)
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::conflict("Email is already registered")
            } else {
                ApiError::internal(err)
            }
        })
    }

    /// Returns the user when the credentials match, `None` otherwise. The
    /// response never distinguishes an unknown email from a wrong password,
    /// and the hash comparison runs in both cases.
    pub async fn verify_user(&self, email: &str, password: &str) -> ApiResult<Option<User>> {
        let normalized = normalize_email(email);
        let row = sqlx::query_as::<_, UserAuthRow>(
            "SELECT id, email, name, email_verified, created_at, updated_at, password_hash
             FROM users WHERE email = $1",
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        match row {
            Some(row) => {
                let hash = row.password_hash.clone().filter(|hash| !hash.is_empty());
                match hash {
                    Some(hash) => {
                        if verify_password(&hash, password)? {
                            Ok(Some(row.into_user()))
                        } else {
                            Ok(None)
                        }
                    }
                    // OAuth-only account: no password to match.
                    None => {
                        let _ = verify_password(&DUMMY_HASH, password);
                        Ok(None)
                    }
                }
            }
            None => {
                let _ = verify_password(&DUMMY_HASH, password);
                Ok(None)
            }
        }
    }

    pub async fn register_admin(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> ApiResult<Admin> {
        let normalized = normalize_email(email);
        let password_hash = hash_password(password)?;

        sqlx::query_as::<_, Admin>(
            "INSERT INTO admins (id, email, password_hash, name, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, email, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&normalized)
        .bind(&password_hash)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::conflict("Admin email is already registered")
            } else {
                ApiError::internal(err)
            }
        })
    }

    pub async fn verify_admin(&self, email: &str, password: &str) -> ApiResult<Option<Admin>> {
        let normalized = normalize_email(email);
        let row = sqlx::query_as::<_, AdminAuthRow>(
            "SELECT id, email, name, created_at, password_hash FROM admins WHERE email = $1",
        )
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        match row {
            Some(row) => {
                if verify_password(&row.password_hash, password)? {
                    Ok(Some(row.into_admin()))
                } else {
                    Ok(None)
                }
            }
            None => {
                let _ = verify_password(&DUMMY_HASH, password);
                Ok(None)
            }
        }
    }

    pub async fn admin_exists(&self) -> ApiResult<bool> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM admins")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(row.0 > 0)
    }

    /// Attach a provider account to a local user: an existing binding wins,
    /// then an existing user with the same email, and only then is a fresh
    /// passwordless user created. This is the sole path that creates a user
    /// without a password hash.
    pub async fn link_oauth_binding(&self, identity: &ProviderIdentity) -> ApiResult<User> {
        let normalized = normalize_email(&identity.email);
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let existing = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, user_id FROM oauth_bindings
             WHERE provider = $1 AND provider_account_id = $2
             FOR UPDATE",
        )
        .bind(&identity.provider)
        .bind(&identity.provider_account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        let user_id = if let Some((binding_id, user_id)) = existing {
            sqlx::query(
                "UPDATE oauth_bindings
                 SET access_token = $1, refresh_token = $2, profile = $3, updated_at = $4
                 WHERE id = $5",
            )
            .bind(&identity.access_token)
            .bind(&identity.refresh_token)
            .bind(&identity.profile)
            .bind(now)
            .bind(binding_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
            user_id
        } else {
            let user = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM users WHERE email = $1")
                .bind(&normalized)
                .fetch_optional(&mut *tx)
                .await
                .map_err(ApiError::internal)?;

            let user_id = match user {
                Some((id,)) => id,
                None => {
                    let id = Uuid::new_v4();
                    sqlx::query(
                        "INSERT INTO users (id, email, password_hash, name, email_verified, created_at, updated_at)
                         VALUES ($1, $2, NULL, $3, TRUE, $4, $5)",
                    )
                    .bind(id)
                    .bind(&normalized)
                    .bind(&identity.name)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(ApiError::internal)?;
                    id
                }
            };

            sqlx::query(
                "INSERT INTO oauth_bindings
                 (id, user_id, provider, provider_account_id, access_token, refresh_token, profile, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&identity.provider)
            .bind(&identity.provider_account_id)
            .bind(&identity.access_token)
            .bind(&identity.refresh_token)
            .bind(&identity.profile)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ApiError::conflict("Provider account is already linked")
                } else {
                    ApiError::internal(err)
                }
            })?;
            user_id
        };

        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, email_verified, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(user)
    }

    pub async fn list_users(&self, limit: i64, offset: i64) -> ApiResult<(Vec<User>, i64)> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, email, name, email_verified, created_at, updated_at
             FROM users
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let total = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?
            .0;

        Ok((users, total))
    }

    /// Delete the given users and their OAuth bindings in one transaction.
    /// Returns the ids of the users actually removed, which may be fewer
    /// than requested when ids are stale or repeated.
    pub async fn bulk_delete_users(&self, ids: &[Uuid]) -> ApiResult<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        sqlx::query("DELETE FROM oauth_bindings WHERE user_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        let deleted = sqlx::query_as::<_, (Uuid,)>(
            "DELETE FROM users WHERE id = ANY($1) RETURNING id",
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(ApiError::internal)?;
        tx.commit().await.map_err(ApiError::internal)?;

        Ok(deleted.into_iter().map(|(id,)| id).collect())
    }
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(ApiError::internal)
}

fn verify_password(hash: &str, password: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(ApiError::internal)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  A@B.C "), "a@b.c");
        assert_eq!(normalize_email("User@Example.COM"), "user@example.com");
    }

    #[test]
    fn password_hashing_round_trips() {
        let hash = hash_password("hunter2x").unwrap();
        assert!(verify_password(&hash, "hunter2x").unwrap());
        assert!(!verify_password(&hash, "hunter2y").unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("hunter2x").unwrap();
        let b = hash_password("hunter2x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dummy_hash_never_matches_real_input() {
        assert!(!verify_password(&DUMMY_HASH, "hunter2x").unwrap());
    }
}
