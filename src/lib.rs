//! Multi-tenant request security pipeline for axum services.
//!
//! Every request passes through a fixed chain of stages (see
//! [`pipeline::STAGES`]) that authenticates the caller, decides which tenant
//! it may act on, watches its session for hijacking and throttles it.
//! Business handlers read the outcome from request extensions or from
//! [`tenant::TenantContext::current`].

pub mod auth;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod ratelimit;
pub mod routes;
pub mod security;
pub mod tenant;
#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    auth::{SigningKey, SigningKeyError, TokenService},
    cache::{Cache, CacheError},
    config::TenantGateConfig,
    directory::{DirectoryError, InMemoryDirectory, PrincipalDirectory, TenantDirectory},
    middleware::ClientIpResolver,
    ratelimit::RateLimiter,
    security::{LoginAttemptGuard, SessionSecurityMonitor},
    tenant::{TenantResolver, TenantValidator},
};

/// Shared state handed to every stage and route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TenantGateConfig>,
    pub tokens: Arc<TokenService>,
    pub cache: Arc<dyn Cache>,
    pub principals: Arc<dyn PrincipalDirectory>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub client_ip: Arc<ClientIpResolver>,
    pub rate_limiter: Arc<RateLimiter>,
    pub login_guard: Arc<LoginAttemptGuard>,
    pub resolver: Arc<TenantResolver>,
    pub validator: Arc<TenantValidator>,
    pub session_monitor: Arc<SessionSecurityMonitor>,
    /// Cancelled on shutdown; aborts pending login delays.
    pub shutdown: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    SigningKey(#[from] SigningKeyError),

    #[error("Failed to initialize shared store: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to load directory: {0}")]
    Directory(#[from] DirectoryError),
}

impl AppState {
    /// Build all components from configuration: validate the signing key,
    /// connect the shared store and load the seeded directory.
    pub async fn from_config(config: TenantGateConfig) -> Result<Self, StartupError> {
        let key = SigningKey::from_config(config.auth.signing_secret.as_deref(), config.server.mode)?;
        let cache = cache::create_cache(&config.cache).await?;
        let directory = Arc::new(InMemoryDirectory::from_config(&config.directory)?);

        tracing::info!(
            mode = config.server.mode.as_str(),
            cache = cache.backend_name(),
            "tenantgate pipeline initialized"
        );

        Ok(Self::with_components(
            config,
            &key,
            cache,
            directory.clone(),
            directory,
        ))
    }

    /// Assemble state from prebuilt components.
    pub fn with_components(
        config: TenantGateConfig,
        key: &SigningKey,
        cache: Arc<dyn Cache>,
        principals: Arc<dyn PrincipalDirectory>,
        tenants: Arc<dyn TenantDirectory>,
    ) -> Self {
        let production = config.server.mode.is_production();
        let store_timeout = Duration::from_millis(config.limits.rate_limits.store_timeout_ms);

        let resolver = TenantResolver::new(config.tenancy.clone(), production, tenants.clone());
        let validator = TenantValidator::new(tenants.clone(), resolver.untrusted_allowed());

        Self {
            tokens: Arc::new(TokenService::new(key, &config.auth)),
            client_ip: Arc::new(ClientIpResolver::new(config.server.trusted_proxies.clone())),
            rate_limiter: Arc::new(RateLimiter::new(
                cache.clone(),
                config.limits.rate_limits.clone(),
            )),
            login_guard: Arc::new(LoginAttemptGuard::new(
                cache.clone(),
                config.limits.login.clone(),
                store_timeout,
            )),
            session_monitor: Arc::new(SessionSecurityMonitor::new(
                cache.clone(),
                config.session_security.clone(),
                store_timeout,
            )),
            resolver: Arc::new(resolver),
            validator: Arc::new(validator),
            cache,
            principals,
            tenants,
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
        }
    }
}

/// Build the router: service routes wrapped in the security pipeline.
pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .merge(routes::auth_routes(&config.auth))
        .nest("/api", routes::api_routes());

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    let app = pipeline::apply(app, &state);

    app.layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(pipeline::panic_layer())
        .with_state(state)
}
