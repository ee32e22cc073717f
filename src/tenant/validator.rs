use std::sync::Arc;

use uuid::Uuid;

use super::TenantCandidate;
use crate::{
    auth::Principal,
    directory::{TenantDirectory, TenantRecord, TenantStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Header, subdomain header or query parameter while untrusted sources
    /// are disallowed.
    UntrustedSource,
    /// The authenticated principal belongs to another tenant.
    PrincipalMismatch,
    /// The tenant header disagrees with the tenant taken from the token
    /// (or from any other chosen source).
    HeaderTokenMismatch,
    Inactive(TenantStatus),
    DirectoryUnavailable,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::UntrustedSource => "untrusted-source",
            RejectionReason::PrincipalMismatch => "principal-mismatch",
            RejectionReason::HeaderTokenMismatch => "header-token-mismatch",
            RejectionReason::Inactive(_) => "tenant-inactive",
            RejectionReason::DirectoryUnavailable => "directory-unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantResolution {
    Resolved(TenantRecord),
    Rejected(RejectionReason),
    NotFound,
}

impl TenantResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantResolution::Resolved(_) => "resolved",
            TenantResolution::Rejected(_) => "rejected",
            TenantResolution::NotFound => "not_found",
        }
    }
}

/// Cross-checks a candidate against the principal and the directory.
pub struct TenantValidator {
    directory: Arc<dyn TenantDirectory>,
    untrusted_allowed: bool,
}

impl TenantValidator {
    pub fn new(directory: Arc<dyn TenantDirectory>, untrusted_allowed: bool) -> Self {
        Self {
            directory,
            untrusted_allowed,
        }
    }

    pub async fn validate(
        &self,
        candidate: &TenantCandidate,
        principal: Option<&Principal>,
    ) -> TenantResolution {
        if !candidate.trusted && !self.untrusted_allowed {
            return TenantResolution::Rejected(RejectionReason::UntrustedSource);
        }

        // Mandatory whenever a principal is present, whatever the source
        if let Some(principal) = principal
            && principal.tenant_id != candidate.tenant_id
        {
            return TenantResolution::Rejected(RejectionReason::PrincipalMismatch);
        }

        if let Some(raw) = &candidate.header_tenant_id
            && Uuid::parse_str(raw.trim()).ok() != Some(candidate.tenant_id)
        {
            return TenantResolution::Rejected(RejectionReason::HeaderTokenMismatch);
        }

        match self.directory.find_by_id(candidate.tenant_id).await {
            Ok(Some(tenant)) if tenant.is_active() => TenantResolution::Resolved(tenant),
            Ok(Some(tenant)) => TenantResolution::Rejected(RejectionReason::Inactive(tenant.status)),
            Ok(None) => TenantResolution::NotFound,
            Err(e) => {
                tracing::error!(error = %e, tenant_id = %candidate.tenant_id, "Tenant lookup failed");
                TenantResolution::Rejected(RejectionReason::DirectoryUnavailable)
            }
        }
    }
}
