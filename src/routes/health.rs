//! Health and metrics endpoints. Exempt from rate limiting by default.

use std::time::{Duration, Instant};

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::{AppState, observability::metrics as obs_metrics};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "degraded"
    pub status: &'static str,
    pub version: &'static str,
    pub mode: &'static str,
    pub store: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub backend: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// Full health check.
///
/// An unreachable shared store reports "degraded" but still returns 200:
/// the pipeline keeps serving (rate limits fail open, sessions fail safe).
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let timeout = Duration::from_millis(state.config.limits.rate_limits.store_timeout_ms);
    let start = Instant::now();
    let probe = tokio::time::timeout(timeout, state.cache.get_bytes("__health_check__")).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let message = match probe {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("Store error: {e}")),
        Err(_) => Some("Store timed out".to_string()),
    };
    let healthy = message.is_none();

    let health = HealthStatus {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        mode: state.config.server.mode.as_str(),
        store: ComponentStatus {
            backend: state.cache.backend_name(),
            healthy,
            message,
            latency_ms,
        },
    };

    (StatusCode::OK, Json(health))
}

/// Liveness probe.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Prometheus metrics in text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    match obs_metrics::render() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain")],
            "Prometheus metrics not enabled".to_string(),
        ),
    }
}
