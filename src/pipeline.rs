//! Stage ordering.
//!
//! The order of [`STAGES`] is the order a request passes through them. It is
//! applied mechanically by [`apply`]; no stage may be added to the router by
//! any other route.

use std::any::Any;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    AppState,
    error::ErrorResponse,
    middleware,
    observability::security::{self, AlertContext, SecurityEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Request id, client IP and the request span.
    RequestId,
    RateLimit,
    /// Progressive delay and lockout; only acts on the login endpoint.
    LoginGuard,
    Authentication,
    /// Tenant resolver followed by the tenant validator.
    TenantResolution,
    SessionSecurity,
    /// Installs the tenant context around the handler and tears it down.
    TenantContext,
}

pub const STAGES: &[Stage] = &[
    Stage::RequestId,
    Stage::RateLimit,
    Stage::LoginGuard,
    Stage::Authentication,
    Stage::TenantResolution,
    Stage::SessionSecurity,
    Stage::TenantContext,
];

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::RequestId => "request_id",
            Stage::RateLimit => "rate_limit",
            Stage::LoginGuard => "login_guard",
            Stage::Authentication => "authentication",
            Stage::TenantResolution => "tenant_resolution",
            Stage::SessionSecurity => "session_security",
            Stage::TenantContext => "tenant_context",
        }
    }

    fn wrap(self, router: Router<AppState>, state: &AppState) -> Router<AppState> {
        let state = state.clone();
        match self {
            Stage::RequestId => {
                router.layer(from_fn_with_state(state, middleware::request_id_middleware))
            }
            Stage::RateLimit => {
                router.layer(from_fn_with_state(state, middleware::rate_limit_middleware))
            }
            Stage::LoginGuard => {
                router.layer(from_fn_with_state(state, middleware::login_guard_middleware))
            }
            Stage::Authentication => router.layer(from_fn_with_state(
                state,
                middleware::authentication_middleware,
            )),
            Stage::TenantResolution => {
                router.layer(from_fn_with_state(state, middleware::tenant_middleware))
            }
            Stage::SessionSecurity => {
                router.layer(from_fn_with_state(state, middleware::session_middleware))
            }
            Stage::TenantContext => router.layer(from_fn_with_state(
                state,
                middleware::tenant_context_middleware,
            )),
        }
    }
}

/// Wrap `router` in every stage. Layers added later run earlier, so the
/// stages are applied last to first.
pub fn apply(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    STAGES
        .iter()
        .rev()
        .fold(router, |router, stage| stage.wrap(router, state))
}

/// Outermost layer: a panic anywhere in the pipeline or a handler becomes a
/// 500 and a security incident. No tenant context survives it.
pub fn panic_layer() -> CatchPanicLayer<fn(Box<dyn Any + Send + 'static>) -> Response> {
    CatchPanicLayer::custom(panic_response as fn(Box<dyn Any + Send + 'static>) -> Response)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    security::emit(
        SecurityEvent::PipelineFailure,
        &AlertContext::default(),
        &format!("Request panicked: {detail}"),
    );

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::with_type(
            "server_error",
            "internal_error",
            "Internal error",
        )),
    )
        .into_response()
}
