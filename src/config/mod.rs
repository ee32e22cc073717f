//! Configuration module for the tenant security pipeline.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! mode = "production"
//!
//! [auth]
//! signing_secret = "${TENANTGATE_SIGNING_SECRET}"
//!
//! [cache]
//! type = "redis"
//! url = "redis://localhost:6379"
//! ```

mod auth;
mod cache;
mod directory;
mod limits;
mod observability;
mod server;
mod tenancy;

use std::path::Path;

pub use auth::*;
pub use cache::*;
pub use directory::*;
pub use limits::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use tenancy::*;

/// Root configuration.
///
/// All sections are optional with defaults, so an empty file yields a
/// development-mode service with an in-memory store and a generated
/// signing secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantGateConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token issuance and bearer authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Throttling and login brute-force protection.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Tenant resolution.
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Session anomaly detection.
    #[serde(default)]
    pub session_security: SessionSecurityConfig,

    /// Shared store for buckets, session and login records.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Seed data for the built-in directory.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl TenantGateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: TenantGateConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Per-IP buckets and session IP pinning both key on the client address.
        // Trusting every forwarded header in production lets a client pick its own.
        if self.server.mode.is_production() && self.server.trusted_proxies.dangerously_trust_all {
            tracing::warn!(
                "server.trusted_proxies.dangerously_trust_all is enabled in production. \
                 Clients that reach the service directly can spoof their IP, rotate \
                 rate-limit buckets and defeat session IP pinning."
            );
        }

        if self.server.mode.is_production()
            && self.tenancy.allow_untrusted_sources == Some(true)
        {
            return Err(ConfigError::Validation(
                "tenancy.allow_untrusted_sources cannot be enabled in production mode".into(),
            ));
        }

        if self
            .directory
            .tenants
            .iter()
            .any(|t| t.id == self.tenancy.default_tenant_id)
        {
            return Err(ConfigError::Validation(
                "tenancy.default_tenant_id must not be a directory tenant; \
                 the system default tenant may not own business data"
                    .into(),
            ));
        }

        self.auth.validate()?;
        self.limits.validate()?;
        self.tenancy.validate()?;
        self.session_security.validate()?;
        self.cache.validate()?;
        self.directory.validate()?;

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization.
///
/// A config selecting a backend that was not compiled in would otherwise fail
/// later with an opaque connection error.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(type_val) = raw
        .get("cache")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_cache_feature(type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}"
    )))
}

fn check_cache_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "redis"))]
        "redis" => _issues.push((
            "cache type 'redis' requires the 'redis' feature".into(),
            "redis",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("env var pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TenantGateConfig::from_str("").unwrap();
        assert_eq!(config.server.mode, DeploymentMode::Development);
        assert_eq!(config.auth.access_token_ttl_secs, 3600);
        assert_eq!(config.auth.refresh_token_ttl_secs, 86_400);
        assert_eq!(config.session_security.switch_threshold, 5);
        assert_eq!(config.session_security.switch_window_secs, 900);
        assert_eq!(config.session_security.invalid_attempt_threshold, 3);
        assert_eq!(config.cache.backend_name(), "memory");
    }

    #[test]
    fn test_full_config() {
        let config = TenantGateConfig::from_str(
            r#"
            [server]
            port = 9000
            mode = "production"

            [server.trusted_proxies]
            cidrs = ["10.0.0.0/8"]

            [auth]
            access_token_ttl_secs = 900
            leeway_secs = 10

            [limits.rate_limits]
            per_ip = false

            [limits.rate_limits.standard]
            capacity = 50
            refill_tokens = 50

            [limits.login]
            lock_threshold = 5

            [tenancy]
            base_domain = "example.com"

            [[directory.tenants]]
            id = "00000000-0000-0000-0000-000000000001"
            name = "Acme"
            subdomain = "acme"
        "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.mode.is_production());
        assert!(!config.limits.rate_limits.per_ip);
        assert_eq!(config.limits.rate_limits.standard.capacity, 50);
        assert_eq!(config.limits.rate_limits.standard.refill_period_secs, 60);
        assert_eq!(config.limits.login.lock_threshold, 5);
        assert_eq!(config.tenancy.base_domain.as_deref(), Some("example.com"));
        assert_eq!(config.directory.tenants.len(), 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = TenantGateConfig::from_str(
            r#"
            [server]
            prot = 9000
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_untrusted_sources_forbidden_in_production() {
        let err = TenantGateConfig::from_str(
            r#"
            [server]
            mode = "production"

            [tenancy]
            allow_untrusted_sources = true
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("allow_untrusted_sources"));
    }

    #[test]
    fn test_default_tenant_cannot_be_directory_tenant() {
        let err = TenantGateConfig::from_str(
            r#"
            [[directory.tenants]]
            id = "00000000-0000-0000-0000-000000000000"
            name = "Shadow"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default_tenant_id"));
    }

    #[test]
    #[cfg(not(feature = "redis"))]
    fn test_disabled_redis_error() {
        let err = TenantGateConfig::from_str(
            r#"
            [cache]
            type = "redis"
            url = "redis://localhost"
        "#,
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("'redis' feature"), "{msg}");
        assert!(msg.contains("cargo build --features"), "{msg}");
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_SIGNING_SECRET", Some("s3cr3t"), || {
            let result = expand_env_vars("signing_secret = \"${TEST_SIGNING_SECRET}\"").unwrap();
            assert_eq!(result, "signing_secret = \"s3cr3t\"");
        });
    }

    #[test]
    fn test_missing_env_var_errors() {
        temp_env::with_var_unset("TEST_DEFINITELY_UNSET", || {
            let err = expand_env_vars("key = \"${TEST_DEFINITELY_UNSET}\"").unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "TEST_DEFINITELY_UNSET"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# signing_secret = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# signing_secret = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
