use std::sync::Arc;

use axum::http::{HeaderMap, header::HOST};
use uuid::Uuid;

use super::TenantSource;
use crate::{
    config::TenancyConfig,
    directory::TenantDirectory,
    observability::security::{self, AlertContext, SecurityEvent},
};

/// The single tenant a request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCandidate {
    pub tenant_id: Uuid,
    pub source: TenantSource,
    pub trusted: bool,
    /// Raw tenant header value, kept for the header/token consistency check
    /// even when the header was not the chosen source.
    pub header_tenant_id: Option<String>,
}

/// Request data the resolver reads.
#[derive(Debug, Clone, Copy)]
pub struct TenantInputs<'a> {
    /// `companyId` of the already verified token.
    pub token_tenant: Option<Uuid>,
    pub headers: &'a HeaderMap,
    pub query: Option<&'a str>,
}

/// Picks at most one tenant candidate per request, by strict priority:
/// token claim, tenant headers, host subdomain, query parameter.
pub struct TenantResolver {
    config: TenancyConfig,
    untrusted_allowed: bool,
    production: bool,
    directory: Arc<dyn TenantDirectory>,
}

impl TenantResolver {
    pub fn new(
        config: TenancyConfig,
        production: bool,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        Self {
            untrusted_allowed: config.untrusted_allowed(production),
            config,
            production,
            directory,
        }
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn untrusted_allowed(&self) -> bool {
        self.untrusted_allowed
    }

    pub async fn resolve(
        &self,
        inputs: TenantInputs<'_>,
        alert: &AlertContext,
    ) -> Option<TenantCandidate> {
        let header_tenant_id = self.tenant_header(inputs.headers);

        if let Some(raw) = &header_tenant_id {
            security::emit(
                SecurityEvent::TenantHeaderOverride,
                &AlertContext {
                    requested_tenant: Some(raw.clone()),
                    source: Some(TenantSource::Header.as_str()),
                    ..alert.clone()
                },
                "Client supplied a tenant header",
            );
        }

        let candidate = |tenant_id, source: TenantSource| TenantCandidate {
            tenant_id,
            source,
            trusted: source.is_trusted(),
            header_tenant_id: header_tenant_id.clone(),
        };

        // 1. Verified token claim
        if let Some(tenant_id) = inputs.token_tenant {
            return Some(candidate(tenant_id, TenantSource::Token));
        }

        // 2. Override headers
        if let Some(raw) = &header_tenant_id {
            match Uuid::parse_str(raw.trim()) {
                Ok(tenant_id) => return Some(candidate(tenant_id, TenantSource::Header)),
                Err(_) => tracing::debug!(value = %raw, "Ignoring malformed tenant header"),
            }
        }
        if let Some(subdomain) = header_str(inputs.headers, &self.config.subdomain_header) {
            security::emit(
                SecurityEvent::TenantHeaderOverride,
                &AlertContext {
                    requested_tenant: Some(subdomain.to_string()),
                    source: Some(TenantSource::SubdomainHeader.as_str()),
                    ..alert.clone()
                },
                "Client supplied a subdomain header",
            );
            if let Some(tenant_id) = self.lookup_subdomain(subdomain).await {
                return Some(candidate(tenant_id, TenantSource::SubdomainHeader));
            }
        }

        // 3. Host subdomain
        if let Some(label) = inputs
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|host| self.subdomain_of(host))
            && let Some(tenant_id) = self.lookup_subdomain(&label).await
        {
            return Some(candidate(tenant_id, TenantSource::Host));
        }

        // 4. Query parameter
        if let Some((name, value)) = self.query_tenant(inputs.query) {
            if self.production {
                security::emit(
                    SecurityEvent::TenantQueryParamIgnored,
                    &AlertContext {
                        requested_tenant: Some(value),
                        source: Some(TenantSource::QueryParam.as_str()),
                        ..alert.clone()
                    },
                    &format!("Tenant query parameter '{name}' ignored in production"),
                );
                return None;
            }
            match Uuid::parse_str(value.trim()) {
                Ok(tenant_id) => return Some(candidate(tenant_id, TenantSource::QueryParam)),
                Err(_) => tracing::debug!(param = %name, "Ignoring malformed tenant parameter"),
            }
        }

        None
    }

    fn tenant_header(&self, headers: &HeaderMap) -> Option<String> {
        self.config
            .tenant_headers
            .iter()
            .find_map(|name| header_str(headers, name))
            .map(str::to_string)
    }

    /// The single label left of the base domain, e.g. `acme` for
    /// `acme.example.com:8443` under `example.com`.
    fn subdomain_of(&self, host: &str) -> Option<String> {
        let base = self.config.base_domain.as_deref()?;
        let host = host.rsplit_once(':').map_or(host, |(h, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) { h } else { host }
        });
        let host = host.to_ascii_lowercase();
        let label = host.strip_suffix(&base.to_ascii_lowercase())?.strip_suffix('.')?;
        (!label.is_empty() && !label.contains('.')).then(|| label.to_string())
    }

    async fn lookup_subdomain(&self, subdomain: &str) -> Option<Uuid> {
        match self.directory.find_by_subdomain(subdomain).await {
            Ok(Some(tenant)) => Some(tenant.id),
            Ok(None) => {
                tracing::debug!(subdomain, "No tenant mapped to subdomain");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, subdomain, "Subdomain lookup failed");
                None
            }
        }
    }

    fn query_tenant(&self, query: Option<&str>) -> Option<(String, String)> {
        let query = query?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, v)| !v.is_empty() && self.config.query_params.iter().any(|p| p == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
