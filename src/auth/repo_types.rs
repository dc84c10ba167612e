use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Account role carried in token claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Customer,
    RestaurantOwner,
    Driver,
    Admin,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string, never exposed
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields needed to insert a user; the store fills in id and flags.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub created_at: OffsetDateTime,
}

/// Partial update. `None` leaves a column untouched; `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub password_hash: Option<String>,
    pub refresh_token_hash: Option<Option<String>>,
    pub reset_token_hash: Option<Option<String>>,
    pub reset_token_expires_at: Option<Option<OffsetDateTime>>,
    pub last_login_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none()
            && self.refresh_token_hash.is_none()
            && self.reset_token_hash.is_none()
            && self.reset_token_expires_at.is_none()
            && self.last_login_at.is_none()
            && self.updated_at.is_none()
    }

    /// Writes the provided fields onto `user`.
    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = self.refresh_token_hash {
            user.refresh_token_hash = v;
        }
        if let Some(v) = self.reset_token_hash {
            user.reset_token_hash = v;
        }
        if let Some(v) = self.reset_token_expires_at {
            user.reset_token_expires_at = v;
        }
        if let Some(v) = self.last_login_at {
            user.last_login_at = Some(v);
        }
        if let Some(v) = self.updated_at {
            user.updated_at = v;
        }
    }
}
