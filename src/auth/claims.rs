use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::{User, UserRole};

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Identity a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub sub: Uuid,
    pub email: String,
    pub role: UserRole,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,       // user ID
    pub email: String,
    pub role: UserRole,
    pub iat: i64,        // issued at (unix timestamp)
    pub exp: i64,        // expires at (unix timestamp)
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
    pub jti: Uuid,       // unique per token
}
