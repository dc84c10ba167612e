use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{debug, error};

use crate::error::{AuthError, AuthResult};

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PasswordConfig {
    /// 19 MiB memory, `cost` passes.
    pub fn with_cost(cost: u32) -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: cost.max(1),
            parallelism: 1,
        }
    }

    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self::with_cost(12)
    }
}

/// Salted one-way hashing for passwords, refresh tokens and reset tokens.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: PasswordConfig) -> AuthResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid argon2 params: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, secret: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AuthError::Internal(anyhow::anyhow!(e.to_string()))
            })?
            .to_string();
        Ok(hash)
    }

    /// Constant-time check of `secret` against a stored PHC string.
    /// A malformed hash verifies as `false`.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "stored hash is not a valid PHC string");
                return false;
            }
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
