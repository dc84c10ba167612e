pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod ratelimit;
pub mod state;

pub use app::{build_app, serve};
pub use state::AppState;
