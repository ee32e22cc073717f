use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use super::tenant::TenantOutcome;
use crate::{AppState, tenant::TenantContext};

pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";
pub const TENANT_NAME_HEADER: &str = "X-Tenant-Name";
pub const TENANT_STATUS_HEADER: &str = "X-Tenant-Status";

/// Logs when the request's tenant scope ends, however it ends.
struct ScopeGuard {
    tenant_id: uuid::Uuid,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        tracing::trace!(tenant_id = %self.tenant_id, "Tenant context cleared");
    }
}

/// Last stage: install the tenant context around the handler.
///
/// The context lives in the request extensions and in a task-local for the
/// duration of the downstream future only.
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let context = req
        .extensions()
        .get::<TenantOutcome>()
        .map(|o| o.context.clone())
        .unwrap_or_else(|| TenantContext::system_default(state.resolver.config()));

    req.extensions_mut().insert(context.clone());

    let mut response = {
        let _guard = ScopeGuard {
            tenant_id: context.tenant_id,
        };
        context.clone().scope(next.run(req)).await
    };

    set_tenant_headers(response.headers_mut(), &context);
    response
}

fn set_tenant_headers(headers: &mut HeaderMap, context: &TenantContext) {
    headers.insert(
        TENANT_ID_HEADER,
        HeaderValue::from_str(&context.tenant_id.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    // Tenant names are free text; omit rather than fail on non-header-safe ones
    if let Ok(name) = HeaderValue::from_str(&context.tenant_name) {
        headers.insert(TENANT_NAME_HEADER, name);
    }
    headers.insert(
        TENANT_STATUS_HEADER,
        HeaderValue::from_static(context.status.as_str()),
    );
}
