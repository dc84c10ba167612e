//! Per-client request limiting for the auth routes, backed by governor.
//!
//! `max_requests` cells refill evenly over `window` (GCRA). The limiter is an
//! ordinary value held in `AppState`, so every test can build its own and
//! `reset()` it; there is no process-wide table.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock as GovernorClock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter as Governor,
};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::AuthError;
use crate::state::AppState;

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";

/// Drop idle keys every N checks so the store does not grow with every client seen.
const SHRINK_INTERVAL: u64 = 1000;

type KeyedLimiter<C> =
    Governor<String, DashMapStateStore<String>, C, StateInformationMiddleware>;

/// Outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

pub struct RateLimiter<C: GovernorClock = DefaultClock> {
    config: RateLimitConfig,
    quota: Quota,
    clock: C,
    limiter: RwLock<Arc<KeyedLimiter<C>>>,
    request_count: AtomicU64,
}

fn quota_for(config: &RateLimitConfig) -> Quota {
    let burst = NonZeroU32::new(config.max_requests).unwrap_or(NonZeroU32::MIN);
    let per_cell = (config.window / burst.get()).max(Duration::from_nanos(1));
    Quota::with_period(per_cell)
        .map(|q| q.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst))
}

impl RateLimiter<DefaultClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: GovernorClock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        let quota = quota_for(&config);
        let limiter = Self::fresh(quota, &clock);
        Self {
            config,
            quota,
            clock,
            limiter: RwLock::new(limiter),
            request_count: AtomicU64::new(0),
        }
    }

    fn fresh(quota: Quota, clock: &C) -> Arc<KeyedLimiter<C>> {
        Arc::new(
            Governor::dashmap_with_clock(quota, clock)
                .with_middleware::<StateInformationMiddleware>(),
        )
    }

    fn current(&self) -> Arc<KeyedLimiter<C>> {
        self.limiter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Counts one request for `key`.
    pub fn check(&self, key: &str) -> Decision {
        let limiter = self.current();

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count % SHRINK_INTERVAL == 0 && count > 0 {
            limiter.retain_recent();
        }

        let limit = self.quota.burst_size().get();
        match limiter.check_key(&key.to_string()) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                Decision {
                    allowed: true,
                    limit,
                    remaining,
                    reset_in: self.quota.replenish_interval() * limit.saturating_sub(remaining),
                }
            }
            Err(not_until) => Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_in: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    /// Forget all clients.
    pub fn reset(&self) {
        let fresh = Self::fresh(self.quota, &self.clock);
        *self.limiter.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    /// Drop clients whose allowance has fully refilled.
    pub fn purge_idle(&self) {
        let limiter = self.current();
        limiter.retain_recent();
        limiter.shrink_to_fit();
        debug!(tracked = limiter.len(), "rate limiter purged");
    }

    pub fn tracked_keys(&self) -> usize {
        self.current().len()
    }

    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.config.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return format!("ip:{ip}");
            }
        }
        match peer {
            Some(addr) => format!("ip:{}", addr.ip()),
            None => "ip:unknown".to_string(),
        }
    }
}

fn put_headers(headers: &mut HeaderMap, d: &Decision) {
    let reset_at = SystemTime::now()
        .checked_add(d.reset_in)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|t| t.as_secs())
        .unwrap_or_default();
    for (name, value) in [
        (LIMIT, d.limit.to_string()),
        (REMAINING, d.remaining.to_string()),
        (RESET, reset_at.to_string()),
    ] {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = state.rate_limiter.client_key(req.headers(), peer);
    let decision = state.rate_limiter.check(&key);

    let mut res = if decision.allowed {
        next.run(req).await
    } else {
        warn!(client = %key, limit = decision.limit, "rate limit exceeded");
        AuthError::TooManyRequests {
            retry_after_secs: decision.reset_in.as_secs().max(1),
        }
        .into_response()
    };
    put_headers(res.headers_mut(), &decision);
    res
}
