use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::TenancyConfig,
    directory::{TenantRecord, TenantStatus},
};

tokio::task_local! {
    static CURRENT_TENANT: TenantContext;
}

/// Where a tenant identifier was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    /// `companyId` claim of a verified token.
    Token,
    /// `X-Tenant-ID` / `X-Company-ID` request header.
    Header,
    /// `X-Subdomain` request header.
    SubdomainHeader,
    /// Subdomain of the `Host` header under the base domain.
    Host,
    /// `tenantId` / `companyId` query parameter.
    QueryParam,
    /// Nothing usable was supplied, or the request was refused.
    Default,
}

impl TenantSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantSource::Token => "token",
            TenantSource::Header => "header",
            TenantSource::SubdomainHeader => "subdomain_header",
            TenantSource::Host => "host",
            TenantSource::QueryParam => "query_param",
            TenantSource::Default => "default",
        }
    }

    /// Sources a client cannot choose freely.
    pub fn is_trusted(self) -> bool {
        matches!(
            self,
            TenantSource::Token | TenantSource::Host | TenantSource::Default
        )
    }
}

/// The tenant an in-flight request acts on.
///
/// Installed as a request extension and as a task-local for the duration of
/// the downstream future. Nothing outlives the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub status: TenantStatus,
    pub source: TenantSource,
}

impl TenantContext {
    pub fn resolved(tenant: &TenantRecord, source: TenantSource) -> Self {
        Self {
            tenant_id: tenant.id,
            tenant_name: tenant.name.clone(),
            status: tenant.status,
            source,
        }
    }

    /// The system default tenant, used whenever no tenant may be granted.
    pub fn system_default(config: &TenancyConfig) -> Self {
        Self {
            tenant_id: config.default_tenant_id,
            tenant_name: config.default_tenant_name.clone(),
            status: TenantStatus::Active,
            source: TenantSource::Default,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == TenantSource::Default
    }

    /// The tenant of the current task, if inside a request scope.
    pub fn current() -> Option<TenantContext> {
        CURRENT_TENANT.try_with(Clone::clone).ok()
    }

    /// Run `fut` with this context installed. It is removed when `fut`
    /// completes, panics or is dropped.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_TENANT.scope(self, fut).await
    }
}
