use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Throttling and brute-force protection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Token-bucket request throttling.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Login attempt guard.
    #[serde(default)]
    pub login: LoginGuardConfig,
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limits.validate()?;
        self.login.validate()
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Enable request throttling.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Give each anonymous client IP its own bucket.
    /// When disabled, all anonymous traffic shares a single bucket.
    #[serde(default = "default_true")]
    pub per_ip: bool,

    /// Upper bound on a single store round trip, in milliseconds.
    /// On timeout the request is allowed and a warning is logged.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Roles that select the premium tier.
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,

    /// Path prefixes always throttled at the public tier, regardless of
    /// whether the request carries a token.
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,

    /// Paths that bypass throttling entirely (health probes).
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Tier for unauthenticated requests and authentication endpoints.
    #[serde(default = "default_public_tier")]
    pub public: TierLimits,

    /// Tier for authenticated non-administrative principals.
    #[serde(default = "default_standard_tier")]
    pub standard: TierLimits,

    /// Tier for administrative principals.
    #[serde(default = "default_premium_tier")]
    pub premium: TierLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_ip: true,
            store_timeout_ms: default_store_timeout_ms(),
            admin_roles: default_admin_roles(),
            public_paths: default_public_paths(),
            exempt_paths: default_exempt_paths(),
            public: default_public_tier(),
            standard: default_standard_tier(),
            premium: default_premium_tier(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, tier) in [
            ("public", &self.public),
            ("standard", &self.standard),
            ("premium", &self.premium),
        ] {
            tier.validate(name)?;
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "limits.rate_limits.store_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Capacity and refill schedule of one tier.
///
/// The bucket refills continuously: `refill_tokens` are added spread evenly
/// over every `refill_period_secs`, never exceeding `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierLimits {
    pub capacity: u32,
    pub refill_tokens: u32,
    #[serde(default = "default_refill_period")]
    pub refill_period_secs: u64,
}

impl TierLimits {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.refill_tokens == 0 || self.refill_period_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "limits.rate_limits.{name}: capacity, refill_tokens and refill_period_secs must all be greater than 0"
            )));
        }
        Ok(())
    }

    /// Nanoseconds needed to regenerate a single token.
    pub fn nanos_per_token(&self) -> u64 {
        let period_nanos = self.refill_period_secs.saturating_mul(1_000_000_000);
        (period_nanos / u64::from(self.refill_tokens.max(1))).max(1)
    }
}

fn default_true() -> bool {
    true
}

fn default_store_timeout_ms() -> u64 {
    50
}

fn default_admin_roles() -> Vec<String> {
    vec!["ROLE_ADMIN".to_string(), "ROLE_SUPER_ADMIN".to_string()]
}

fn default_public_paths() -> Vec<String> {
    vec!["/auth/".to_string()]
}

fn default_exempt_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

fn default_refill_period() -> u64 {
    60
}

fn default_public_tier() -> TierLimits {
    TierLimits {
        capacity: 20,
        refill_tokens: 20,
        refill_period_secs: 60,
    }
}

fn default_standard_tier() -> TierLimits {
    TierLimits {
        capacity: 100,
        refill_tokens: 100,
        refill_period_secs: 60,
    }
}

fn default_premium_tier() -> TierLimits {
    TierLimits {
        capacity: 1000,
        refill_tokens: 1000,
        refill_period_secs: 60,
    }
}

/// Login attempt guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginGuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay applied after the first consecutive failure, in milliseconds.
    /// Each further failure doubles it.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the progressive delay, in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Consecutive failures after which the identity is locked out.
    #[serde(default = "default_lock_threshold")]
    pub lock_threshold: u32,

    /// Lockout duration in seconds.
    #[serde(default = "default_lock_duration_secs")]
    pub lock_duration_secs: u64,

    /// How long a failure record survives without new failures, in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LoginGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            lock_threshold: default_lock_threshold(),
            lock_duration_secs: default_lock_duration_secs(),
            window_secs: default_window_secs(),
        }
    }
}

impl LoginGuardConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_threshold == 0 {
            return Err(ConfigError::Validation(
                "limits.login.lock_threshold must be greater than 0".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_secs.saturating_mul(1000) {
            return Err(ConfigError::Validation(
                "limits.login.base_delay_ms must not exceed limits.login.max_delay_secs".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_lock_threshold() -> u32 {
    10
}

fn default_lock_duration_secs() -> u64 {
    900
}

fn default_window_secs() -> u64 {
    900
}
