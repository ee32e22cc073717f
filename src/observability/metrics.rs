//! Prometheus metrics for the security pipeline.
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature so call sites stay unconditional.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0],
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Install the Prometheus recorder (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Render the current metrics in Prometheus text format.
pub fn render() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(|h| h.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a completed HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);
        counter!("http_requests_total", "method" => method.to_string(), "route" => route.to_string(), "status_class" => status_class.clone())
            .increment(1);
        histogram!("http_request_duration_seconds", "method" => method.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, route, status, duration_secs);
    }
}

/// Record a rate-limit decision.
///
/// * `result` - "allowed", "limited" or "degraded" (store unavailable)
pub fn record_rate_limit(result: &str, tier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rate_limit_checks_total", "result" => result.to_string(), "tier" => tier.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, tier);
    }
}

/// Record a login guard outcome ("allowed", "delayed", "blocked", "success", "failure").
pub fn record_login_guard(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("login_guard_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a 429 response.
pub fn record_throttled(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("throttled_responses_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record how the authentication stage disposed of a request.
pub fn record_auth_outcome(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("auth_outcomes_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record an error returned by the credential endpoints.
pub fn record_auth_failure(code: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("auth_endpoint_failures_total", "code" => code.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = code;
    }
}

/// Record the tenant resolution result for a request.
///
/// * `source` - where the candidate came from ("token", "header", ...)
/// * `result` - "resolved", "rejected" or "not_found"
pub fn record_tenant_resolution(source: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("tenant_resolutions_total", "source" => source.to_string(), "result" => result.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (source, result);
    }
}

/// Record a security event.
pub fn record_security_event(event: &str, severity: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("security_events_total", "event" => event.to_string(), "severity" => severity.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (event, severity);
    }
}

/// Record a failed or timed-out shared store call.
pub fn record_store_error(component: &str, operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("store_errors_total", "component" => component.to_string(), "operation" => operation.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (component, operation);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
