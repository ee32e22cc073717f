use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::{ClientIp, session::session_id};
use crate::{
    AppState,
    auth::{Principal, VerifiedClaims},
    observability::{
        metrics,
        security::{self, AlertContext, SecurityEvent},
    },
    tenant::{
        RejectionReason, TenantCandidate, TenantContext, TenantInputs, TenantResolution,
        TenantSource,
    },
};

/// What tenant resolution decided for the request.
///
/// Inserted by [`tenant_middleware`]; the session stage may downgrade
/// `context` to the system default, and the context stage installs it.
#[derive(Debug, Clone)]
pub struct TenantOutcome {
    pub context: TenantContext,
    pub candidate: Option<TenantCandidate>,
    pub rejection: Option<RejectionReason>,
}

impl TenantOutcome {
    /// A tenant was requested but not granted (rejected or unknown).
    pub fn refused(&self) -> bool {
        self.candidate.is_some() && self.context.is_default()
    }
}

/// Resolve the request's tenant and validate it.
///
/// Any rejection installs the system default tenant; the disputed tenant is
/// never granted.
pub async fn tenant_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal = req.extensions().get::<Principal>().cloned();
    let token_tenant = req
        .extensions()
        .get::<VerifiedClaims>()
        .and_then(|c| c.0.company_id);

    let alert = AlertContext {
        principal: principal.as_ref().map(|p| p.username.clone()),
        ip: req.extensions().get::<ClientIp>().and_then(|c| c.0),
        ..Default::default()
    }
    .with_session(session_id(&req, state.session_monitor.config()).as_deref());

    let inputs = TenantInputs {
        token_tenant,
        headers: req.headers(),
        query: req.uri().query(),
    };
    let candidate = state.resolver.resolve(inputs, &alert).await;
    let default = || TenantContext::system_default(state.resolver.config());

    let outcome = match &candidate {
        None => {
            metrics::record_tenant_resolution(TenantSource::Default.as_str(), "default");
            TenantOutcome {
                context: default(),
                candidate: None,
                rejection: None,
            }
        }
        Some(cand) => {
            let resolution = state.validator.validate(cand, principal.as_ref()).await;
            metrics::record_tenant_resolution(cand.source.as_str(), resolution.as_str());

            match resolution {
                TenantResolution::Resolved(tenant) => {
                    tracing::debug!(
                        tenant_id = %tenant.id,
                        source = cand.source.as_str(),
                        "Tenant resolved"
                    );
                    TenantOutcome {
                        context: TenantContext::resolved(&tenant, cand.source),
                        candidate: candidate.clone(),
                        rejection: None,
                    }
                }
                TenantResolution::Rejected(reason) => {
                    security::emit(
                        SecurityEvent::TenantRejected,
                        &AlertContext {
                            requested_tenant: Some(cand.tenant_id.to_string()),
                            source: Some(cand.source.as_str()),
                            ..alert.clone()
                        },
                        &format!("Tenant rejected: {}", reason.as_str()),
                    );
                    TenantOutcome {
                        context: default(),
                        candidate: candidate.clone(),
                        rejection: Some(reason),
                    }
                }
                TenantResolution::NotFound => {
                    tracing::info!(
                        tenant_id = %cand.tenant_id,
                        source = cand.source.as_str(),
                        "Requested tenant does not exist, using default"
                    );
                    TenantOutcome {
                        context: default(),
                        candidate: candidate.clone(),
                        rejection: None,
                    }
                }
            }
        }
    };

    req.extensions_mut().insert(outcome);
    next.run(req).await
}
