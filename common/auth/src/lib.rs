pub mod claims;
pub mod error;
pub mod extractors;
pub mod tokens;

pub use claims::{Claims, Role, SubjectType};
pub use error::{AuthError, AuthResult};
pub use extractors::{bearer_token, AdminContext, AuthContext};
pub use tokens::{TokenIssuer, TokenSubject, TOKEN_TTL_DAYS};
