use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConfigError;

/// Tenant resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// The system default tenant installed when resolution fails or is rejected.
    /// It must not own business data.
    #[serde(default = "default_tenant_id")]
    pub default_tenant_id: Uuid,

    #[serde(default = "default_tenant_name")]
    pub default_tenant_name: String,

    /// Headers carrying an explicit tenant identifier, checked in order.
    #[serde(default = "default_tenant_headers")]
    pub tenant_headers: Vec<String>,

    /// Header carrying an explicit subdomain override.
    #[serde(default = "default_subdomain_header")]
    pub subdomain_header: String,

    /// Query parameters carrying a tenant identifier, checked in order.
    #[serde(default = "default_query_params")]
    pub query_params: Vec<String>,

    /// Base domain under which tenant subdomains live (e.g. `example.com`
    /// makes `acme.example.com` resolve the `acme` subdomain).
    #[serde(default)]
    pub base_domain: Option<String>,

    /// Honor untrusted sources (headers, query parameters).
    /// `None` means "allowed outside production".
    #[serde(default)]
    pub allow_untrusted_sources: Option<bool>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_tenant_id: default_tenant_id(),
            default_tenant_name: default_tenant_name(),
            tenant_headers: default_tenant_headers(),
            subdomain_header: default_subdomain_header(),
            query_params: default_query_params(),
            base_domain: None,
            allow_untrusted_sources: None,
        }
    }
}

impl TenancyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_headers.is_empty() {
            return Err(ConfigError::Validation(
                "tenancy.tenant_headers must list at least one header".into(),
            ));
        }
        for header in self
            .tenant_headers
            .iter()
            .chain(std::iter::once(&self.subdomain_header))
        {
            if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(ConfigError::Validation(format!(
                    "tenancy: '{header}' is not a valid header name"
                )));
            }
        }
        if let Some(domain) = &self.base_domain
            && (domain.is_empty() || domain.starts_with('.'))
        {
            return Err(ConfigError::Validation(
                "tenancy.base_domain must be a bare domain such as 'example.com'".into(),
            ));
        }
        Ok(())
    }

    /// Whether untrusted sources are honored in the given mode.
    pub fn untrusted_allowed(&self, production: bool) -> bool {
        self.allow_untrusted_sources.unwrap_or(!production)
    }
}

fn default_tenant_id() -> Uuid {
    Uuid::nil()
}

fn default_tenant_name() -> String {
    "system".to_string()
}

fn default_tenant_headers() -> Vec<String> {
    vec!["X-Tenant-ID".to_string(), "X-Company-ID".to_string()]
}

fn default_subdomain_header() -> String {
    "X-Subdomain".to_string()
}

fn default_query_params() -> Vec<String> {
    vec!["tenantId".to_string(), "companyId".to_string()]
}

/// Session security monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deny the tenant context when a session is used from a new IP.
    #[serde(default = "default_true")]
    pub ip_pinning: bool,

    /// Tenant switches tolerated within one window before denial.
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: u32,

    /// Switch window length, measured from the first switch of a run.
    #[serde(default = "default_switch_window_secs")]
    pub switch_window_secs: u64,

    /// Rejections per session after which an escalation alert is emitted.
    #[serde(default = "default_invalid_attempt_threshold")]
    pub invalid_attempt_threshold: u32,

    /// Lifetime of an idle session record, in seconds.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,

    /// Header carrying the session identifier.
    #[serde(default = "default_session_header")]
    pub header: String,

    /// Cookie carrying the session identifier.
    #[serde(default = "default_session_cookie")]
    pub cookie: String,
}

impl Default for SessionSecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_pinning: true,
            switch_threshold: default_switch_threshold(),
            switch_window_secs: default_switch_window_secs(),
            invalid_attempt_threshold: default_invalid_attempt_threshold(),
            record_ttl_secs: default_record_ttl_secs(),
            header: default_session_header(),
            cookie: default_session_cookie(),
        }
    }
}

impl SessionSecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.switch_window_secs == 0 || self.record_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "session_security: switch_window_secs and record_ttl_secs must be greater than 0"
                    .into(),
            ));
        }
        if self.record_ttl_secs < self.switch_window_secs {
            return Err(ConfigError::Validation(
                "session_security.record_ttl_secs must cover at least one switch window".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_switch_threshold() -> u32 {
    5
}

fn default_switch_window_secs() -> u64 {
    900
}

fn default_invalid_attempt_threshold() -> u32 {
    3
}

fn default_record_ttl_secs() -> u64 {
    86_400
}

fn default_session_header() -> String {
    "X-Session-ID".to_string()
}

fn default_session_cookie() -> String {
    "SESSION".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrusted_sources_follow_mode() {
        let config = TenancyConfig::default();
        assert!(config.untrusted_allowed(false));
        assert!(!config.untrusted_allowed(true));

        let forced = TenancyConfig {
            allow_untrusted_sources: Some(true),
            ..Default::default()
        };
        assert!(forced.untrusted_allowed(true));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let config = TenancyConfig {
            tenant_headers: vec!["bad header".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_record_ttl_shorter_than_window_rejected() {
        let config = SessionSecurityConfig {
            record_ttl_secs: 60,
            switch_window_secs: 900,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
