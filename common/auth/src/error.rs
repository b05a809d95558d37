use common_http_errors::ApiError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    // Deliberately content-free: verification errors must not reveal
    // anything about the token payload.
    #[error("token verification failed")]
    TokenInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid claim '{0}'")]
    InvalidClaim(&'static str, String),
    #[error("admin role required")]
    AdminRequired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenExpired => ApiError::TokenExpired,
            AuthError::AdminRequired => ApiError::forbidden("Admin role required"),
            AuthError::Signing(detail) => ApiError::internal(detail),
            AuthError::MissingAuthorization
            | AuthError::InvalidAuthorization
            | AuthError::TokenInvalid
            | AuthError::InvalidClaim(..) => ApiError::unauthorized(),
        }
    }
}
