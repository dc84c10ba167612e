use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::auth::memory::MemoryUserStore;
use crate::auth::notifier::{ResetNotifier, TracingNotifier};
use crate::auth::password::{PasswordConfig, PasswordHasher};
use crate::auth::repo::{PgUserStore, UserStore};
use crate::auth::services::AuthService;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match config.database_url.as_deref() {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgUserStore::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users live in memory and vanish on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let hasher = PasswordHasher::new(PasswordConfig::with_cost(config.password_hash_cost))?;
        Self::from_parts(
            config,
            store,
            hasher,
            Arc::new(SystemClock),
            Arc::new(TracingNotifier),
        )
    }

    /// Explicit wiring of the auth core; tests pass their own store, hasher, clock and notifier.
    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ResetNotifier>,
    ) -> anyhow::Result<Self> {
        let keys = JwtKeys::new(&config.jwt, clock.clone());
        let auth = AuthService::new(
            store,
            hasher,
            keys,
            clock,
            notifier,
            config.reset_token_ttl,
        )?;
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        Ok(Self {
            config,
            auth: Arc::new(auth),
            rate_limiter: Arc::new(rate_limiter),
        })
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.keys().clone()
    }
}
