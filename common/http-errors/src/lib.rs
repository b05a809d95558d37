use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// JSON envelope for every surfaced error:
/// `{ error, message, statusCode, nextActions? }`.
#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "nextActions", skip_serializing_if = "Option::is_none")]
    pub next_actions: Option<&'static str>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized { message: String },
    TokenExpired,
    Forbidden { message: String },
    NotFound { message: String },
    Conflict { message: String },
    InvalidInput { message: String },
    OAuthStateInvalid { message: String },
    OAuthProviderError { message: String },
    // Carries the underlying detail for logs only; the response body is a
    // bare 500.
    CipherCorrupt { detail: String },
    Internal { detail: String },
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized {
            message: "Missing or invalid credentials".to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn oauth_state_invalid() -> Self {
        Self::OAuthStateInvalid {
            message: "OAuth state is missing, expired, or already used".to_string(),
        }
    }

    pub fn oauth_provider<E: std::fmt::Display>(err: E) -> Self {
        Self::OAuthProviderError {
            message: format!("OAuth provider request failed: {err}"),
        }
    }

    pub fn cipher_corrupt<E: std::fmt::Display>(err: E) -> Self {
        Self::CipherCorrupt {
            detail: err.to_string(),
        }
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal {
            detail: err.to_string(),
        }
    }

    /// Stable machine-readable kind; also the `X-Error-Code` header value.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized { .. } => "Unauthorized",
            ApiError::TokenExpired => "TokenExpired",
            ApiError::Forbidden { .. } => "Forbidden",
            ApiError::NotFound { .. } => "NotFound",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::InvalidInput { .. } => "InvalidInput",
            ApiError::OAuthStateInvalid { .. } => "OAuthStateInvalid",
            ApiError::OAuthProviderError { .. } => "OAuthProviderError",
            ApiError::CipherCorrupt { .. } => "Internal",
            ApiError::Internal { .. } => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized { .. } | ApiError::TokenExpired => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::InvalidInput { .. } | ApiError::OAuthStateInvalid { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::OAuthProviderError { .. } => StatusCode::BAD_GATEWAY,
            ApiError::CipherCorrupt { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        let status_code = self.status().as_u16();
        let (message, next_actions) = match self {
            ApiError::Unauthorized { message } => (message.clone(), None),
            ApiError::TokenExpired => (
                "Session token has expired".to_string(),
                Some("Sign in again to obtain a fresh token"),
            ),
            ApiError::Forbidden { message }
            | ApiError::NotFound { message }
            | ApiError::Conflict { message }
            | ApiError::InvalidInput { message }
            | ApiError::OAuthStateInvalid { message } => (message.clone(), None),
            ApiError::OAuthProviderError { message } => (
                message.clone(),
                Some("Retry, or check the provider configuration"),
            ),
            ApiError::CipherCorrupt { .. } | ApiError::Internal { .. } => {
                ("Internal server error".to_string(), None)
            }
        };
        ErrorBody {
            error: self.kind(),
            message,
            status_code,
            next_actions,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized { message } => write!(f, "{message}"),
            ApiError::TokenExpired => write!(f, "Session token has expired"),
            ApiError::Forbidden { message } => write!(f, "{message}"),
            ApiError::NotFound { message } => write!(f, "{message}"),
            ApiError::Conflict { message } => write!(f, "{message}"),
            ApiError::InvalidInput { message } => write!(f, "{message}"),
            ApiError::OAuthStateInvalid { message } => write!(f, "{message}"),
            ApiError::OAuthProviderError { message } => write!(f, "{message}"),
            ApiError::CipherCorrupt { detail } => write!(f, "{detail}"),
            ApiError::Internal { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::CipherCorrupt { detail } => {
                tracing::error!(detail = %detail, "ciphertext failed to decrypt");
            }
            ApiError::Internal { detail } => {
                tracing::error!(detail = %detail, "internal error");
            }
            _ => {}
        }
        let body = self.body();
        let mut resp = (self.status(), Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(self.kind()) {
            resp.headers_mut().insert("X-Error-Code", value);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
