use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::Duration as TimeDuration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::claims::{Claims, Identity, TokenKind};
use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};

/// Signing and verification keys; access and refresh tokens use separate secrets.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    fn sign_with_kind(&self, who: &Identity, kind: TokenKind) -> AuthResult<String> {
        let now = self.clock.now();
        let (ttl, key) = match kind {
            TokenKind::Access => (self.access_ttl, &self.access_encoding),
            TokenKind::Refresh => (self.refresh_ttl, &self.refresh_encoding),
        };
        let exp = TimeDuration::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("token ttl out of range")))?;
        let claims = Claims {
            sub: who.sub,
            email: who.email.clone(),
            role: who.role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| AuthError::Internal(e.into()))?;
        debug!(user_id = %who.sub, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue_access_token(&self, who: &Identity) -> AuthResult<String> {
        self.sign_with_kind(who, TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, who: &Identity) -> AuthResult<String> {
        self.sign_with_kind(who, TokenKind::Refresh)
    }

    /// Checks signature, issuer, audience, kind and expiry against the injected clock.
    pub fn verify(&self, token: &str, which: TokenKind) -> AuthResult<Claims> {
        let key = match which {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, key, &validation)
            .map_err(|e| {
                debug!(error = %e, kind = ?which, "jwt rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.kind != which {
            debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt kind mismatch");
            return Err(AuthError::InvalidToken);
        }
        if claims.exp <= self.clock.now().unix_timestamp() {
            debug!(user_id = %claims.sub, kind = ?which, "jwt expired");
            return Err(AuthError::InvalidToken);
        }
        debug!(user_id = %claims.sub, kind = ?which, "jwt verified");
        Ok(claims)
    }
}

/// Verified access-token claims of the caller.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError::Unauthorized("Missing Authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| AuthError::Unauthorized("Invalid Authorization header".into()))?;

        match keys.verify(token, TokenKind::Access) {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(e) => {
                warn!("invalid or expired access token");
                Err(e)
            }
        }
    }
}
