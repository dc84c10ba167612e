use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs against the in-memory user store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub password_hash_cost: u32,
    pub reset_token_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).with_context(|| format!("{key} must be set"));
        let ttl = |key: &str, default: &str| -> anyhow::Result<Duration> {
            let raw = lookup(key).unwrap_or_else(|| default.to_string());
            parse_ttl(&raw).with_context(|| format!("invalid {key}: {raw:?}"))
        };

        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "fooddash".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "fooddash-users".into()),
            access_ttl: ttl("ACCESS_TOKEN_TTL", "15m")?,
            refresh_ttl: ttl("REFRESH_TOKEN_TTL", "7d")?,
        };
        if jwt.access_secret == jwt.refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let password_hash_cost = match lookup("PASSWORD_HASH_COST") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|c| *c >= 1)
                .with_context(|| format!("invalid PASSWORD_HASH_COST: {v:?}"))?,
            None => 12,
        };

        let rate_limit = RateLimitConfig {
            window: ttl("RATE_LIMIT_WINDOW", "15m")?,
            max_requests: match lookup("RATE_LIMIT_MAX") {
                Some(v) => v
                    .parse::<u32>()
                    .ok()
                    .filter(|m| *m >= 1)
                    .with_context(|| format!("invalid RATE_LIMIT_MAX: {v:?}"))?,
                None => 100,
            },
            trust_proxy: lookup("TRUST_PROXY")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = lookup("APP_PORT").unwrap_or_else(|| "8080".into());
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid APP_HOST/APP_PORT: {host:?}:{port:?}"))?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            jwt,
            password_hash_cost,
            reset_token_ttl: ttl("RESET_TOKEN_TTL", "1h")?,
            rate_limit,
            bind_addr,
        })
    }
}

/// Longest accepted TTL, so expiry arithmetic on timestamps cannot overflow.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Parses `"15m"`, `"7d"`, `"1h"`, `"30s"` or a bare number of seconds.
pub fn parse_ttl(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        bail!("missing number");
    }
    let n: u64 = digits.parse()?;
    let unit_secs: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        other => bail!("unknown unit {other:?}"),
    };
    let secs = n.checked_mul(unit_secs).context("duration too large")?;
    if secs == 0 {
        bail!("duration must be positive");
    }
    let ttl = Duration::from_secs(secs);
    if ttl > MAX_TTL {
        bail!("duration longer than 365d");
    }
    Ok(ttl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/fooddash"),
        ("ACCESS_TOKEN_SECRET", "access"),
        ("REFRESH_TOKEN_SECRET", "refresh"),
    ];

    #[test]
    fn parse_ttl_units() {
        assert_eq!(parse_ttl("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_ttl("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_ttl("45").unwrap(), Duration::from_secs(45));
        assert!(parse_ttl("m").is_err());
        assert!(parse_ttl("10w").is_err());
        assert!(parse_ttl("0s").is_err());
        assert_eq!(parse_ttl("365d").unwrap(), MAX_TTL);
        assert!(parse_ttl("366d").is_err());
        assert!(parse_ttl("18446744073709551615").is_err());
        assert!(parse_ttl("99999999999999999999").is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup_from(BASE)).expect("config");
        assert_eq!(cfg.jwt.access_ttl, Duration::from_secs(15 * 60));
        assert_eq!(cfg.jwt.refresh_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(cfg.reset_token_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.password_hash_cost, 12);
        assert_eq!(cfg.jwt.issuer, "fooddash");
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert!(!cfg.rate_limit.trust_proxy);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn bind_address_comes_from_host_and_port() {
        let mut pairs = BASE.to_vec();
        pairs.push(("APP_HOST", "127.0.0.1"));
        pairs.push(("APP_PORT", "3000"));
        let cfg = AppConfig::from_lookup(lookup_from(&pairs)).expect("config");
        assert_eq!(cfg.bind_addr, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());

        let mut pairs = BASE.to_vec();
        pairs.push(("APP_PORT", "eighty"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("APP_HOST/APP_PORT"));
    }

    #[test]
    fn rejects_shared_secret() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/fooddash"),
            ("ACCESS_TOKEN_SECRET", "same"),
            ("REFRESH_TOKEN_SECRET", "same"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut pairs = BASE.to_vec();
        pairs.push(("PASSWORD_HASH_COST", "0"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("RATE_LIMIT_MAX", "0"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("ACCESS_TOKEN_TTL", "soon"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());

        let err = AppConfig::from_lookup(lookup_from(&BASE[..1])).unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_SECRET"));
    }

    #[test]
    fn database_url_is_optional() {
        let cfg = AppConfig::from_lookup(lookup_from(&BASE[1..])).expect("config");
        assert!(cfg.database_url.is_none());
    }
}
