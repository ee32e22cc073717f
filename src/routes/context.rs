use axum::{Extension, Json};
use serde::Serialize;

use crate::{
    auth::{AuthOutcome, Principal},
    tenant::TenantContext,
};

#[derive(Debug, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub user_id: uuid::Uuid,
    pub username: String,
    pub display_name: String,
    pub tenant_id: uuid::Uuid,
    pub authorities: Vec<String>,
}

#[derive(Debug, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub authenticated: bool,
    pub auth_status: String,
    pub principal: Option<PrincipalView>,
    pub tenant_id: uuid::Uuid,
    pub tenant_name: String,
    pub tenant_source: String,
    /// Tenant seen through the task-local; always equals `tenant_id`.
    pub scoped_tenant_id: Option<uuid::Uuid>,
}

/// Echo what the pipeline decided for this request.
pub async fn current_context(
    principal: Option<Extension<Principal>>,
    outcome: Option<Extension<AuthOutcome>>,
    Extension(tenant): Extension<TenantContext>,
) -> Json<ContextResponse> {
    let principal = principal.map(|Extension(p)| PrincipalView {
        user_id: p.user_id,
        username: p.username,
        display_name: p.display_name,
        tenant_id: p.tenant_id,
        authorities: p.authorities.into_iter().collect(),
    });

    Json(ContextResponse {
        authenticated: principal.is_some(),
        auth_status: outcome
            .map(|Extension(o)| o.as_str())
            .unwrap_or(AuthOutcome::Anonymous.as_str())
            .to_string(),
        principal,
        tenant_id: tenant.tenant_id,
        tenant_name: tenant.tenant_name,
        tenant_source: tenant.source.as_str().to_string(),
        scoped_tenant_id: TenantContext::current().map(|t| t.tenant_id),
    })
}
