use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::{email_taken, user_not_found, UserStore};
use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::AuthResult;

/// In-process `UserStore`, used by tests and local runs without a database.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record.
    pub fn reset(&self) {
        self.users.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(user_not_found)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(&id).cloned().ok_or_else(user_not_found)
    }

    async fn create(&self, new: NewUser) -> AuthResult<User> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        if users.values().any(|u| u.email == new.email) {
            return Err(email_taken());
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            phone: new.phone,
            role: new.role,
            is_active: true,
            email_verified: false,
            refresh_token_hash: None,
            reset_token_hash: None,
            reset_token_expires_at: None,
            last_login_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> AuthResult<()> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let user = users.get_mut(&id).ok_or_else(user_not_found)?;
        patch.apply(user);
        Ok(())
    }

    async fn find_open_resets(&self, now: OffsetDateTime) -> AuthResult<Vec<User>> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users
            .values()
            .filter(|u| u.reset_token_hash.is_some())
            .filter(|u| u.reset_token_expires_at.is_some_and(|exp| exp > now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
impl MemoryUserStore {
    /// Test hook for flipping flags the core never writes.
    pub fn set_active(&self, id: Uuid, active: bool) {
        if let Some(u) = self.users.write().unwrap().get_mut(&id) {
            u.is_active = active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::UserRole;
    use crate::error::AuthError;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            phone: None,
            role: UserRole::Customer,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@example.com")).await.unwrap();
        assert!(user.is_active);
        assert!(!user.email_verified);
        assert_eq!(store.find_by_id(user.id).await.unwrap().email, "a@example.com");
        assert_eq!(store.find_by_email("a@example.com").await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_without_touching_first() {
        let store = MemoryUserStore::new();
        let first = store.create(new_user("a@example.com")).await.unwrap();
        let mut dup = new_user("a@example.com");
        dup.password_hash = "other".into();
        let err = store.create(dup).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_id(first.id).await.unwrap().password_hash, "hash");
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryUserStore::new();
        assert!(matches!(
            store.find_by_email("nobody@example.com").await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            store.update_fields(Uuid::new_v4(), UserPatch::default()).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn patch_touches_only_provided_fields() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@example.com")).await.unwrap();
        store
            .update_fields(
                user.id,
                UserPatch {
                    refresh_token_hash: Some(Some("r".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = store.find_by_id(user.id).await.unwrap();
        assert_eq!(after.refresh_token_hash.as_deref(), Some("r"));
        assert_eq!(after.password_hash, "hash");

        store
            .update_fields(
                user.id,
                UserPatch {
                    refresh_token_hash: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().refresh_token_hash.is_none());
    }

    #[tokio::test]
    async fn open_resets_respect_expiry() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("a@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .update_fields(
                user.id,
                UserPatch {
                    reset_token_hash: Some(Some("h".into())),
                    reset_token_expires_at: Some(Some(now + Duration::hours(1))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.find_open_resets(now).await.unwrap().len(), 1);
        assert!(store
            .find_open_resets(now + Duration::hours(2))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@example.com")).await.unwrap();
        store.reset();
        assert_eq!(store.len(), 0);
        store.create(new_user("a@example.com")).await.unwrap();
    }
}
