use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment mode. Production tightens which tenant sources are trusted
    /// and makes a weak signing secret a fatal startup error.
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Request body size limit in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Trusted proxy configuration for extracting real client IPs.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: DeploymentMode::default(),
            body_limit_bytes: default_body_limit(),
            trusted_proxies: TrustedProxiesConfig::default(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MB
}

/// Deployment mode of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    Production,
    #[default]
    Development,
    Test,
}

impl DeploymentMode {
    pub fn is_production(self) -> bool {
        matches!(self, DeploymentMode::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Production => "production",
            DeploymentMode::Development => "development",
            DeploymentMode::Test => "test",
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(DeploymentMode::Production),
            "development" | "dev" => Ok(DeploymentMode::Development),
            "test" => Ok(DeploymentMode::Test),
            other => Err(format!("unknown deployment mode '{other}'")),
        }
    }
}

/// Configuration for trusted reverse proxies.
///
/// **Security Note:** Proxy header spoofing is a serious vulnerability here because
/// the client IP feeds both per-IP rate limiting and session IP pinning. Only trust
/// proxy headers when the connecting client is from a known proxy IP/CIDR range.
///
/// When proxy headers are trusted, X-Forwarded-For is parsed right-to-left, skipping
/// IPs that are within trusted CIDRs, to find the first untrusted (client) IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Trust all proxies (use X-Forwarded-For as-is).
    ///
    /// **WARNING:** If attackers can connect directly to the service, they can spoof
    /// any IP, rotate their rate-limit bucket and defeat session IP pinning.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    /// List of trusted proxy CIDR ranges (e.g., ["10.0.0.0/8", "172.16.0.0/12"]).
    #[serde(default)]
    pub cidrs: Vec<String>,

    /// Header to use for the real client IP.
    #[serde(default = "default_real_ip_header")]
    pub real_ip_header: String,
}

impl Default for TrustedProxiesConfig {
    fn default() -> Self {
        Self {
            dangerously_trust_all: false,
            cidrs: Vec::new(),
            real_ip_header: default_real_ip_header(),
        }
    }
}

impl TrustedProxiesConfig {
    /// Parse the CIDR strings into IpNet objects.
    ///
    /// Invalid CIDRs are logged as warnings and skipped.
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter_map(|cidr_str| {
                cidr_str.parse::<IpNet>().ok().or_else(|| {
                    tracing::warn!(cidr = %cidr_str, "Invalid CIDR in trusted_proxies config, skipping");
                    None
                })
            })
            .collect()
    }

    /// Check if an IP address is within any of the trusted CIDR ranges.
    pub fn is_trusted_ip(&self, ip: IpAddr, parsed_cidrs: &[IpNet]) -> bool {
        if self.dangerously_trust_all {
            return true;
        }
        parsed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// Returns true if proxy headers should potentially be trusted.
    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }
}

fn default_real_ip_header() -> String {
    "X-Forwarded-For".to_string()
}
