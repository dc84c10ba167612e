use axum::{middleware, Router};

use crate::ratelimit::rate_limit;
use crate::state::AppState;

pub mod claims;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod notifier;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod validation;

/// Auth routes, each counted against the client's rate-limit window.
pub fn router(state: AppState) -> Router<AppState> {
    handlers::auth_routes().route_layer(middleware::from_fn_with_state(state, rate_limit))
}
