use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::claims::{Claims, ClaimsRepr, Role, SubjectType};
use crate::error::{AuthError, AuthResult};

/// Session tokens live for seven days.
pub const TOKEN_TTL_DAYS: i64 = 7;

/// Identity a token is minted for.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub subject_type: SubjectType,
}

impl TokenSubject {
    pub fn user(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            role: Role::Authenticated,
            subject_type: SubjectType::User,
        }
    }

    pub fn admin(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            role: Role::ProjectAdmin,
            subject_type: SubjectType::Admin,
        }
    }
}

/// Signs and verifies session JWTs with a single HS256 secret.
///
/// Stateless given the key; safe to share behind an `Arc`.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, Duration::days(TOKEN_TTL_DAYS))
    }

    pub fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, subject: &TokenSubject) -> AuthResult<String> {
        let now = Utc::now();
        let claims = ClaimsRepr {
            sub: subject.id.to_string(),
            email: subject.email.clone(),
            role: subject.role,
            subject_type: subject.subject_type,
            iat: Some(now.timestamp()),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        match decode::<ClaimsRepr>(token, &self.decoding_key, &validation) {
            Ok(data) => Claims::try_from(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::TokenExpired),
                _ => Err(AuthError::TokenInvalid),
            },
        }
    }

    pub fn verify_admin(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.verify(token)?;
        if claims.role != Role::ProjectAdmin {
            return Err(AuthError::AdminRequired);
        }
        Ok(claims)
    }
}
