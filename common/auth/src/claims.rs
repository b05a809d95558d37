use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Role claim carried by every session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Authenticated,
    ProjectAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Authenticated => "authenticated",
            Role::ProjectAdmin => "project_admin",
        }
    }
}

/// Whether the token subject lives in the user or the admin namespace.
/// The two are distinct identities even when they share an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Admin,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Admin => "admin",
        }
    }
}

/// Application-focused representation of verified token claims.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: Uuid,
    pub email: String,
    pub role: Role,
    pub subject_type: SubjectType,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::ProjectAdmin
    }
}

/// Wire layout of the JWT payload:
/// `{ sub, email, role, type, iat, exp }`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    #[serde(default)]
    pub iat: Option<i64>,
    pub exp: i64,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = Uuid::parse_str(&value.sub)
            .map_err(|_| AuthError::InvalidClaim("sub", value.sub.clone()))?;

        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| AuthError::InvalidClaim("iat", iat.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            subject,
            email: value.email,
            role: value.role,
            subject_type: value.subject_type,
            issued_at,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_values() {
        assert_eq!(
            serde_json::to_value(Role::Authenticated).unwrap(),
            "authenticated"
        );
        assert_eq!(
            serde_json::to_value(Role::ProjectAdmin).unwrap(),
            "project_admin"
        );
    }

    #[test]
    fn subject_type_serializes_as_type_field() {
        let repr = ClaimsRepr {
            sub: Uuid::new_v4().to_string(),
            email: "a@b.c".to_string(),
            role: Role::Authenticated,
            subject_type: SubjectType::User,
            iat: Some(0),
            exp: 1,
        };
        let value = serde_json::to_value(&repr).unwrap();
        assert_eq!(value["type"], "user");
        assert!(value.get("subject_type").is_none());
    }

    #[test]
    fn malformed_sub_is_rejected() {
        let repr = ClaimsRepr {
            sub: "not-a-uuid".to_string(),
            email: "a@b.c".to_string(),
            role: Role::Authenticated,
            subject_type: SubjectType::User,
            iat: None,
            exp: 1,
        };
        assert!(Claims::try_from(repr).is_err());
    }
}
