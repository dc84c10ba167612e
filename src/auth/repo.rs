use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::{AuthError, AuthResult};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone, role, \
    is_active, email_verified, refresh_token_hash, reset_token_hash, reset_token_expires_at, \
    last_login_at, created_at, updated_at";

/// Persistence for credential-bearing user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by (already normalized) email.
    async fn find_by_email(&self, email: &str) -> AuthResult<User>;

    async fn find_by_id(&self, id: Uuid) -> AuthResult<User>;

    /// Insert a user; `Conflict` if the email is taken.
    async fn create(&self, user: NewUser) -> AuthResult<User>;

    /// Last-write-wins update of the provided fields only.
    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> AuthResult<()>;

    /// Users holding a reset token that expires after `now`.
    async fn find_open_resets(&self, now: OffsetDateTime) -> AuthResult<Vec<User>>;
}

pub(crate) fn user_not_found() -> AuthError {
    AuthError::NotFound("User not found".into())
}

pub(crate) fn email_taken() -> AuthError {
    AuthError::Conflict("User with this email already exists".into())
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(user_not_found)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(user_not_found)
    }

    async fn create(&self, user: NewUser) -> AuthResult<User> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone, role,
                               is_active, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, FALSE, $8, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(user.role)
        .bind(user.created_at)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                Err(email_taken())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> AuthResult<()> {
        if patch.is_empty() {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.db)
                    .await?;
            return if exists { Ok(()) } else { Err(user_not_found()) };
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        let mut set = qb.separated(", ");
        if let Some(v) = patch.password_hash {
            set.push("password_hash = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.refresh_token_hash {
            set.push("refresh_token_hash = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.reset_token_hash {
            set.push("reset_token_hash = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.reset_token_expires_at {
            set.push("reset_token_expires_at = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.last_login_at {
            set.push("last_login_at = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.updated_at {
            set.push("updated_at = ").push_bind_unseparated(v);
        }
        qb.push(" WHERE id = ").push_bind(id);

        let done = qb.build().execute(&self.db).await?;
        if done.rows_affected() == 0 {
            return Err(user_not_found());
        }
        Ok(())
    }

    async fn find_open_resets(&self, now: OffsetDateTime) -> AuthResult<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE reset_token_hash IS NOT NULL AND reset_token_expires_at > $1
            "#
        ))
        .bind(now)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryUserStore;
    use crate::auth::repo_types::UserRole;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: None,
            role: UserRole::Customer,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Behaviour every `UserStore` must share.
    async fn store_contract(store: &dyn UserStore) {
        let email = format!("{}@example.com", Uuid::new_v4());
        let user = store.create(new_user(&email)).await.unwrap();

        assert!(matches!(
            store.create(new_user(&email)).await,
            Err(AuthError::Conflict(_))
        ));

        store.update_fields(user.id, UserPatch::default()).await.unwrap();
        assert!(matches!(
            store.update_fields(Uuid::new_v4(), UserPatch::default()).await,
            Err(AuthError::NotFound(_))
        ));

        let patch = UserPatch {
            refresh_token_hash: Some(Some("r".into())),
            ..Default::default()
        };
        assert!(matches!(
            store.update_fields(Uuid::new_v4(), patch).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_honours_the_contract() {
        store_contract(&MemoryUserStore::new()).await;
    }

    #[tokio::test]
    async fn postgres_store_honours_the_contract() {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            return;
        };
        let db = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();
        store_contract(&PgUserStore::new(db)).await;
    }
}
