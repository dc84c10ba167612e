//! Credential and token lifecycle: register, login, refresh, logout and the
//! password reset/change flows.
//!
//! Every secret at rest (password, refresh token, reset token) is an argon2
//! hash. A user holds at most one live refresh token; issuing a session
//! overwrites the stored hash, so any earlier refresh token stops working.

use std::sync::Arc;
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use time::Duration as TimeDuration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::claims::Identity;
use crate::auth::dto::{AuthResponse, PublicUser, RegisterRequest};
use crate::auth::jwt::JwtKeys;
use crate::auth::notifier::ResetNotifier;
use crate::auth::password::PasswordHasher;
use crate::auth::repo::{email_taken, UserStore};
use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::auth::validation::normalize_email;
use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};

fn invalid_credentials() -> AuthError {
    AuthError::Unauthorized("Invalid credentials".into())
}

fn access_denied() -> AuthError {
    AuthError::Unauthorized("Access denied".into())
}

/// 32 random bytes, hex encoded.
fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct AuthService {
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    keys: JwtKeys,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ResetNotifier>,
    reset_ttl: Duration,
    // verified against when the email is unknown so both login failures cost the same
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        keys: JwtKeys,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ResetNotifier>,
        reset_ttl: Duration,
    ) -> AuthResult<Self> {
        let dummy_hash = hasher.hash(&generate_reset_token())?;
        Ok(Self {
            store,
            hasher,
            keys,
            clock,
            notifier,
            reset_ttl,
            dummy_hash,
        })
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    async fn hash_secret(&self, secret: &str) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        let secret = secret.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AuthError::Internal(e.into()))?
    }

    async fn verify_secret(&self, secret: &str, hash: &str) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        let secret = secret.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &hash))
            .await
            .map_err(|e| AuthError::Internal(e.into()))
    }

    /// Issues an access/refresh pair and stores the refresh hash together with `patch`.
    async fn issue_session(&self, user: &User, mut patch: UserPatch) -> AuthResult<AuthResponse> {
        let who = Identity::from(user);
        let access_token = self.keys.issue_access_token(&who)?;
        let refresh_token = self.keys.issue_refresh_token(&who)?;

        let refresh_hash = self.hash_secret(&refresh_token).await?;
        patch.refresh_token_hash = Some(Some(refresh_hash));
        patch.updated_at = Some(self.clock.now());
        self.store.update_fields(user.id, patch).await?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.keys.access_ttl().as_secs(),
            user: PublicUser::from(user),
        })
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> AuthResult<AuthResponse> {
        let email = normalize_email(&req.email);

        match self.store.find_by_email(&email).await {
            Ok(_) => {
                warn!(email = %email, "email already registered");
                return Err(email_taken());
            }
            Err(AuthError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let password_hash = self.hash_secret(&req.password).await?;
        let user = self
            .store
            .create(NewUser {
                email,
                password_hash,
                first_name: req.first_name.trim().to_string(),
                last_name: req.last_name.trim().to_string(),
                phone: req.phone.map(|p| p.trim().to_string()),
                role: req.role.unwrap_or_default(),
                created_at: self.clock.now(),
            })
            .await?;

        info!(user_id = %user.id, role = ?user.role, "user registered");
        self.issue_session(&user, UserPatch::default()).await
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthResponse> {
        let email = normalize_email(email);

        let user = match self.store.find_by_email(&email).await {
            Ok(u) => u,
            Err(AuthError::NotFound(_)) => {
                self.verify_secret(password, &self.dummy_hash).await?;
                warn!(email = %email, "login unknown email");
                return Err(invalid_credentials());
            }
            Err(e) => return Err(e),
        };

        if !self.verify_secret(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(invalid_credentials());
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login on deactivated account");
            return Err(AuthError::Unauthorized("Account is deactivated".into()));
        }

        let patch = UserPatch {
            last_login_at: Some(self.clock.now()),
            ..Default::default()
        };
        let res = self.issue_session(&user, patch).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(res)
    }

    /// Exchanges the user's current refresh token for a new pair.
    #[instrument(skip(self, presented))]
    pub async fn refresh(&self, user_id: Uuid, presented: &str) -> AuthResult<AuthResponse> {
        let user = match self.store.find_by_id(user_id).await {
            Ok(u) => u,
            Err(AuthError::NotFound(_)) => return Err(access_denied()),
            Err(e) => return Err(e),
        };

        if !user.is_active {
            warn!(user_id = %user.id, "refresh on deactivated account");
            return Err(access_denied());
        }

        let Some(stored) = user.refresh_token_hash.as_deref() else {
            warn!(user_id = %user.id, "refresh without a live session");
            return Err(access_denied());
        };

        if !self.verify_secret(presented, stored).await? {
            warn!(user_id = %user.id, "stale or unknown refresh token");
            return Err(access_denied());
        }

        let res = self.issue_session(&user, UserPatch::default()).await?;
        info!(user_id = %user.id, "tokens refreshed");
        Ok(res)
    }

    /// Clears the stored refresh hash. Repeating it, or naming an unknown user, is not an error.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> AuthResult<()> {
        let patch = UserPatch {
            refresh_token_hash: Some(None),
            updated_at: Some(self.clock.now()),
            ..Default::default()
        };
        match self.store.update_fields(user_id, patch).await {
            Ok(()) => {
                info!(user_id = %user_id, "user logged out");
                Ok(())
            }
            Err(AuthError::NotFound(_)) => {
                debug!(user_id = %user_id, "logout for unknown user");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Opens a reset window if the email belongs to a user. The caller sees the
    /// same outcome either way.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);

        let user = match self.store.find_by_email(&email).await {
            Ok(u) => Some(u),
            Err(AuthError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let token = generate_reset_token();
        let token_hash = self.hash_secret(&token).await?;

        let Some(user) = user else {
            info!(user_found = false, "password reset requested");
            return Ok(());
        };

        let now = self.clock.now();
        let expires_at = TimeDuration::try_from(self.reset_ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("reset ttl out of range")))?;
        self.store
            .update_fields(
                user.id,
                UserPatch {
                    reset_token_hash: Some(Some(token_hash)),
                    reset_token_expires_at: Some(Some(expires_at)),
                    updated_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        if let Err(e) = self.notifier.send_reset(&user, &token, expires_at).await {
            // the caller must not learn the account exists from a delivery failure
            error!(user_id = %user.id, error = %e, "reset notification failed");
        }

        info!(user_id = %user.id, user_found = true, "password reset requested");
        Ok(())
    }

    /// Consumes a reset token. Also ends any live session.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let candidates = self.store.find_open_resets(now).await?;
        if candidates.is_empty() {
            warn!("reset attempted with no open reset window");
            return Err(AuthError::BadRequest("Invalid or expired reset token".into()));
        }

        let mut matched = None;
        for user in candidates {
            let open = user.reset_token_expires_at.is_some_and(|exp| now < exp);
            let Some(hash) = user.reset_token_hash.as_deref().filter(|_| open) else {
                continue;
            };
            if self.verify_secret(token, hash).await? {
                matched = Some(user);
                break;
            }
        }
        let Some(user) = matched else {
            warn!("reset token did not match any open reset");
            return Err(AuthError::BadRequest("Invalid reset token".into()));
        };

        let password_hash = self.hash_secret(new_password).await?;
        self.store
            .update_fields(
                user.id,
                UserPatch {
                    password_hash: Some(password_hash),
                    refresh_token_hash: Some(None),
                    reset_token_hash: Some(None),
                    reset_token_expires_at: Some(None),
                    updated_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;

        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let user = match self.store.find_by_id(user_id).await {
            Ok(u) => u,
            Err(AuthError::NotFound(_)) => {
                return Err(AuthError::Unauthorized("User not found".into()))
            }
            Err(e) => return Err(e),
        };

        if !self.verify_secret(old_password, &user.password_hash).await? {
            warn!(user_id = %user.id, "change password with wrong current password");
            return Err(AuthError::BadRequest("Current password is incorrect".into()));
        }

        let password_hash = self.hash_secret(new_password).await?;
        self.store
            .update_fields(
                user.id,
                UserPatch {
                    password_hash: Some(password_hash),
                    updated_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await?;

        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, user_id: Uuid) -> AuthResult<PublicUser> {
        match self.store.find_by_id(user_id).await {
            Ok(u) => Ok(PublicUser::from(&u)),
            Err(AuthError::NotFound(_)) => Err(AuthError::Unauthorized("User not found".into())),
            Err(e) => Err(e),
        }
    }
}
