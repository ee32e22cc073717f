//! Security event emission.
//!
//! Every trust decision that refuses or overrides what a request asked for
//! goes through [`emit`], which logs on the `security` target with a fixed set
//! of structured fields and counts the event.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use super::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A client-supplied tenant header was seen.
    TenantHeaderOverride,
    /// A tenant query parameter was ignored in production.
    TenantQueryParamIgnored,
    /// The candidate tenant was refused by the validator.
    TenantRejected,
    /// A session id was presented from a different IP than it started on.
    SessionIpMismatch,
    /// Too many tenant switches within the window.
    TenantSwitchVelocity,
    /// Repeated tenant rejections on one session.
    InvalidAttemptEscalation,
    /// A token verified but named an unusable account.
    AccountRejected,
    /// An identity was locked after repeated login failures.
    LoginLocked,
    /// A pipeline stage failed unexpectedly.
    PipelineFailure,
}

impl SecurityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEvent::TenantHeaderOverride => "tenant_header_override",
            SecurityEvent::TenantQueryParamIgnored => "tenant_query_param_ignored",
            SecurityEvent::TenantRejected => "tenant_rejected",
            SecurityEvent::SessionIpMismatch => "session_ip_mismatch",
            SecurityEvent::TenantSwitchVelocity => "tenant_switch_velocity",
            SecurityEvent::InvalidAttemptEscalation => "invalid_attempt_escalation",
            SecurityEvent::AccountRejected => "account_rejected",
            SecurityEvent::LoginLocked => "login_locked",
            SecurityEvent::PipelineFailure => "pipeline_failure",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            SecurityEvent::TenantHeaderOverride => Severity::Low,
            SecurityEvent::TenantQueryParamIgnored | SecurityEvent::AccountRejected => {
                Severity::Medium
            }
            SecurityEvent::TenantRejected
            | SecurityEvent::TenantSwitchVelocity
            | SecurityEvent::LoginLocked => Severity::High,
            SecurityEvent::SessionIpMismatch
            | SecurityEvent::InvalidAttemptEscalation
            | SecurityEvent::PipelineFailure => Severity::Critical,
        }
    }
}

/// Who and what a security event is about. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct AlertContext {
    pub principal: Option<String>,
    pub ip: Option<IpAddr>,
    /// Session fingerprint, never the raw id.
    pub session: Option<String>,
    pub requested_tenant: Option<String>,
    pub source: Option<&'static str>,
}

impl AlertContext {
    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session = session_id.map(session_fingerprint);
        self
    }
}

/// Short stable identifier for a session id, safe to log.
pub fn session_fingerprint(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    hex::encode(&digest[..6])
}

/// Log and count a security event.
pub fn emit(event: SecurityEvent, ctx: &AlertContext, message: &str) {
    let severity = event.severity();
    metrics::record_security_event(event.as_str(), severity.as_str());

    let principal = ctx.principal.as_deref().unwrap_or("-");
    let ip = ctx.ip.map(|ip| ip.to_string());
    let ip = ip.as_deref().unwrap_or("-");
    let session = ctx.session.as_deref().unwrap_or("-");
    let requested_tenant = ctx.requested_tenant.as_deref().unwrap_or("-");
    let source = ctx.source.unwrap_or("-");

    macro_rules! log_at {
        ($level:ident) => {
            tracing::$level!(
                target: "security",
                event = event.as_str(),
                severity = severity.as_str(),
                principal,
                ip,
                session,
                requested_tenant,
                source,
                "{message}"
            )
        };
    }

    match severity {
        Severity::Low => log_at!(info),
        Severity::Medium => log_at!(warn),
        Severity::High | Severity::Critical => log_at!(error),
    }
}
