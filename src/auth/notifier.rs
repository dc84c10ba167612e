use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::auth::repo_types::User;
use crate::error::AuthResult;

/// Delivers a plaintext password-reset token to its owner.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, user: &User, token: &str, expires_at: OffsetDateTime)
        -> AuthResult<()>;
}

/// Stand-in for a mailer: records that a reset was issued, never the token itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl ResetNotifier for TracingNotifier {
    async fn send_reset(
        &self,
        user: &User,
        _token: &str,
        expires_at: OffsetDateTime,
    ) -> AuthResult<()> {
        info!(user_id = %user.id, %expires_at, "password reset issued; no mailer configured");
        Ok(())
    }
}

#[cfg(test)]
pub use capture::CapturingNotifier;

#[cfg(test)]
mod capture {
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;

    use super::*;

    /// Keeps every issued token so tests can complete the reset.
    #[derive(Debug, Clone, Default)]
    pub struct CapturingNotifier(Arc<Mutex<Vec<(Uuid, String)>>>);

    impl CapturingNotifier {
        pub fn last_for(&self, user_id: Uuid) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(id, _)| *id == user_id)
                .map(|(_, t)| t.clone())
        }

        pub fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResetNotifier for CapturingNotifier {
        async fn send_reset(
            &self,
            user: &User,
            token: &str,
            _expires_at: OffsetDateTime,
        ) -> AuthResult<()> {
            self.0.lock().unwrap().push((user.id, token.to_string()));
            Ok(())
        }
    }
}
