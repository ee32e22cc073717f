use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use super::{ClientIp, tenant::TenantOutcome};
use crate::{
    AppState,
    auth::Principal,
    config::SessionSecurityConfig,
    observability::security::AlertContext,
    security::SessionObservation,
    tenant::TenantContext,
};

/// Longest session id accepted from a client.
const MAX_SESSION_ID_LEN: usize = 256;

/// Session hijack detection.
///
/// Requests without a session id skip the store entirely. A denied session
/// keeps running but with the system default tenant.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let monitor = state.session_monitor.clone();
    if !monitor.config().enabled {
        return next.run(req).await;
    }
    let Some(session_id) = session_id(&req, monitor.config()) else {
        return next.run(req).await;
    };
    let Some(outcome) = req.extensions().get::<TenantOutcome>().cloned() else {
        return next.run(req).await;
    };

    let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0);
    let observation = SessionObservation {
        ip,
        tenant: (!outcome.context.is_default()).then_some(outcome.context.tenant_id),
        rejected: outcome.refused(),
    };
    let alert = AlertContext {
        principal: req
            .extensions()
            .get::<Principal>()
            .map(|p| p.username.clone()),
        ip,
        requested_tenant: outcome.candidate.as_ref().map(|c| c.tenant_id.to_string()),
        source: outcome.candidate.as_ref().map(|c| c.source.as_str()),
        ..Default::default()
    }
    .with_session(Some(&session_id));

    let assessment = monitor.observe(&session_id, observation, &alert).await;
    if let Some(violation) = assessment.violation {
        tracing::warn!(
            violation = violation.as_str(),
            "Session denied, falling back to default tenant"
        );
        req.extensions_mut().insert(TenantOutcome {
            context: TenantContext::system_default(state.resolver.config()),
            ..outcome
        });
    }

    next.run(req).await
}

/// Session id from the configured header, else the session cookie.
pub(crate) fn session_id(req: &Request, config: &SessionSecurityConfig) -> Option<String> {
    let from_header = req
        .headers()
        .get(config.header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let id = from_header.or_else(|| {
        req.extensions()
            .get::<Cookies>()
            .and_then(|cookies| cookies.get(&config.cookie))
            .map(|c| c.value().to_string())
    })?;

    let id = id.trim();
    (!id.is_empty() && id.len() <= MAX_SESSION_ID_LEN).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/context");
        if let Some(value) = header {
            builder = builder.header("X-Session-ID", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_session_id_from_header() {
        let config = SessionSecurityConfig::default();
        assert_eq!(
            session_id(&request(Some(" s-123 ")), &config).as_deref(),
            Some("s-123")
        );
    }

    #[test]
    fn test_missing_or_blank_session_id() {
        let config = SessionSecurityConfig::default();
        assert!(session_id(&request(None), &config).is_none());
        assert!(session_id(&request(Some("  ")), &config).is_none());
    }

    #[test]
    fn test_oversized_session_id_ignored() {
        let config = SessionSecurityConfig::default();
        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(session_id(&request(Some(&long)), &config).is_none());
    }
}
