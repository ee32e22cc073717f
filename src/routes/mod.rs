pub mod auth;
pub mod context;
pub mod health;

use axum::{Router, routing::{get, post}};

use crate::{AppState, config::AuthConfig};

/// Login and refresh endpoints at their configured paths.
pub fn auth_routes(config: &AuthConfig) -> Router<AppState> {
    Router::new()
        .route(&config.login_path, post(auth::login))
        .route(&config.refresh_path, post(auth::refresh))
}

/// Routes nested under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/context", get(context::current_context))
}
