use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Token issuance and bearer authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HMAC signing secret for access and refresh tokens.
    ///
    /// Must be at least 64 characters and must not be a trivially guessable
    /// value. In production mode a missing or weak secret aborts startup; in
    /// other modes it is extended or replaced with a generated one.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Clock-skew tolerance applied to the `exp` claim, in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,

    /// Optional `iss` claim embedded in and required on every token.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Paths on which a `token` query parameter is accepted as a bearer
    /// credential (in addition to any request carrying an `Upgrade` header).
    /// Intended for transports that cannot set headers, such as SSE streams.
    #[serde(default = "default_query_token_paths")]
    pub query_token_paths: Vec<String>,

    /// Path of the login endpoint guarded by the login attempt guard.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Path of the refresh endpoint.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            leeway_secs: default_leeway(),
            issuer: None,
            query_token_paths: default_query_token_paths(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "auth.access_token_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.refresh_token_ttl_secs < self.access_token_ttl_secs {
            return Err(ConfigError::Validation(
                "auth.refresh_token_ttl_secs must not be shorter than auth.access_token_ttl_secs"
                    .into(),
            ));
        }
        if self.leeway_secs > 300 {
            return Err(ConfigError::Validation(
                "auth.leeway_secs must not exceed 300 seconds".into(),
            ));
        }
        if !self.login_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "auth.login_path must start with '/'".into(),
            ));
        }
        Ok(())
    }

    pub fn allows_query_token(&self, path: &str) -> bool {
        self.query_token_paths
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p.trim_end_matches('/'))))
    }
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    86_400
}

fn default_leeway() -> u64 {
    30
}

fn default_query_token_paths() -> Vec<String> {
    vec!["/ws".to_string(), "/api/events".to_string()]
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_token_path_matching() {
        let config = AuthConfig::default();
        assert!(config.allows_query_token("/ws"));
        assert!(config.allows_query_token("/ws/notifications"));
        assert!(!config.allows_query_token("/wsx"));
        assert!(!config.allows_query_token("/api/assets"));
    }

    #[test]
    fn test_refresh_shorter_than_access_rejected() {
        let config = AuthConfig {
            access_token_ttl_secs: 7200,
            refresh_token_ttl_secs: 3600,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
