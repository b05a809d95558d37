use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use common_http_errors::ApiError;

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::tokens::TokenIssuer;

/// Extracts verified session claims from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    /// Actor string recorded in audit entries for this subject.
    pub fn actor(&self) -> &str {
        &self.claims.email
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<TokenIssuer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let issuer = Arc::<TokenIssuer>::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let claims = issuer.verify(&token)?;
        Ok(Self { claims, token })
    }
}

/// `AuthContext` that additionally requires the `project_admin` role.
#[derive(Debug, Clone)]
pub struct AdminContext(pub AuthContext);

impl AdminContext {
    pub fn actor(&self) -> &str {
        self.0.actor()
    }

    pub fn claims(&self) -> &Claims {
        &self.0.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    Arc<TokenIssuer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = AuthContext::from_request_parts(parts, state).await?;
        if !context.claims.is_admin() {
            return Err(AuthError::AdminRequired.into());
        }
        Ok(Self(context))
    }
}

/// Pull the bearer token out of a header map.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<String> {
    let header_value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorization)?;

    let raw = header_value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?
        .trim();

    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthorization)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }

    Ok(token.to_owned())
}
