use std::{net::IpAddr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cache::{Cache, CacheError, CacheKeys},
    config::SessionSecurityConfig,
    observability::{
        metrics,
        security::{self, AlertContext, SecurityEvent},
    },
};

/// Per-session security state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSecurityRecord {
    /// IP the session was first seen from.
    pub origin_ip: Option<IpAddr>,
    pub last_tenant: Option<Uuid>,
    /// Switches in the current run.
    pub switch_count: u32,
    pub invalid_attempts: u32,
    pub first_switch_at: Option<DateTime<Utc>>,
    pub last_switch_at: Option<DateTime<Utc>>,
}

/// What one request did with its session.
#[derive(Debug, Clone, Copy)]
pub struct SessionObservation {
    pub ip: Option<IpAddr>,
    /// Tenant the validator accepted; `None` when none was requested.
    pub tenant: Option<Uuid>,
    /// The validator refused the requested tenant.
    pub rejected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionViolation {
    IpMismatch { origin: IpAddr, observed: IpAddr },
    SwitchVelocity { switches: u32 },
    /// The record could not be read or written.
    StoreUnavailable,
}

impl SessionViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionViolation::IpMismatch { .. } => "ip-mismatch",
            SessionViolation::SwitchVelocity { .. } => "switch-velocity",
            SessionViolation::StoreUnavailable => "store-unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionAssessment {
    /// When set the request must not receive the tenant it resolved.
    pub violation: Option<SessionViolation>,
    /// The invalid-attempt threshold has been reached.
    pub escalated: bool,
    pub invalid_attempts: u32,
}

impl SessionAssessment {
    pub fn is_denied(&self) -> bool {
        self.violation.is_some()
    }
}

impl SessionSecurityRecord {
    /// Apply one observation. Pure: the caller commits the result.
    pub fn observe(
        &mut self,
        obs: &SessionObservation,
        config: &SessionSecurityConfig,
        now: DateTime<Utc>,
    ) -> SessionAssessment {
        if self.origin_ip.is_none() {
            self.origin_ip = obs.ip;
        }

        // A mismatch leaves the record untouched so the legitimate holder
        // keeps their history
        if config.ip_pinning
            && let (Some(origin), Some(observed)) = (self.origin_ip, obs.ip)
            && origin != observed
        {
            return SessionAssessment {
                violation: Some(SessionViolation::IpMismatch { origin, observed }),
                escalated: false,
                invalid_attempts: self.invalid_attempts,
            };
        }

        let window = chrono::Duration::seconds(
            i64::try_from(config.switch_window_secs).unwrap_or(i64::MAX),
        );
        let in_window =
            |start: Option<DateTime<Utc>>| start.is_some_and(|s| now.signed_duration_since(s) <= window);

        if obs.rejected {
            self.invalid_attempts = self.invalid_attempts.saturating_add(1);
        } else if let Some(tenant) = obs.tenant {
            match self.last_tenant {
                Some(last) if last != tenant => {
                    if in_window(self.first_switch_at) {
                        self.switch_count = self.switch_count.saturating_add(1);
                    } else {
                        self.switch_count = 1;
                        self.first_switch_at = Some(now);
                    }
                    self.last_switch_at = Some(now);
                    self.last_tenant = Some(tenant);
                }
                Some(_) => {}
                None => self.last_tenant = Some(tenant),
            }
        }

        // Once over the threshold the session stays denied until the run's
        // window has passed
        let violation = (self.switch_count > config.switch_threshold
            && in_window(self.first_switch_at))
        .then_some(SessionViolation::SwitchVelocity {
            switches: self.switch_count,
        });

        SessionAssessment {
            violation,
            escalated: obs.rejected && self.invalid_attempts >= config.invalid_attempt_threshold,
            invalid_attempts: self.invalid_attempts,
        }
    }
}

/// Tracks session records in the shared store and raises alerts.
pub struct SessionSecurityMonitor {
    cache: Arc<dyn Cache>,
    config: SessionSecurityConfig,
    timeout: Duration,
}

impl SessionSecurityMonitor {
    pub fn new(cache: Arc<dyn Cache>, config: SessionSecurityConfig, timeout: Duration) -> Self {
        Self {
            cache,
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &SessionSecurityConfig {
        &self.config
    }

    pub async fn observe(
        &self,
        session_id: &str,
        obs: SessionObservation,
        alert: &AlertContext,
    ) -> SessionAssessment {
        self.observe_at(session_id, obs, alert, Utc::now()).await
    }

    pub async fn observe_at(
        &self,
        session_id: &str,
        obs: SessionObservation,
        alert: &AlertContext,
        now: DateTime<Utc>,
    ) -> SessionAssessment {
        let key = CacheKeys::session_security(session_id);
        let ttl = Duration::from_secs(self.config.record_ttl_secs);
        let config = &self.config;

        let update = self
            .cache
            .update_json::<SessionSecurityRecord, _, _>(&key, ttl, |current| {
                let mut record = current.unwrap_or_default();
                let assessment = record.observe(&obs, config, now);
                (record, assessment)
            });

        let result = match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        };

        let assessment = match result {
            Ok(assessment) => assessment,
            Err(e) => {
                metrics::record_store_error("session_monitor", "update");
                tracing::error!(
                    error = %e,
                    backend = self.cache.backend_name(),
                    "Session security store unavailable, denying tenant context"
                );
                return SessionAssessment {
                    violation: Some(SessionViolation::StoreUnavailable),
                    escalated: false,
                    invalid_attempts: 0,
                };
            }
        };

        match assessment.violation {
            Some(SessionViolation::IpMismatch { origin, observed }) => security::emit(
                SecurityEvent::SessionIpMismatch,
                alert,
                &format!("Session used from {observed}, originated from {origin}"),
            ),
            Some(SessionViolation::SwitchVelocity { switches }) => security::emit(
                SecurityEvent::TenantSwitchVelocity,
                alert,
                &format!(
                    "{switches} tenant switches within {}s (threshold {})",
                    self.config.switch_window_secs, self.config.switch_threshold
                ),
            ),
            _ => {}
        }

        if assessment.escalated {
            security::emit(
                SecurityEvent::InvalidAttemptEscalation,
                alert,
                &format!(
                    "{} invalid tenant attempts on one session",
                    assessment.invalid_attempts
                ),
            );
        }

        assessment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::MemoryCache, config::MemoryCacheConfig};

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn tenant(n: u128) -> Option<Uuid> {
        Some(Uuid::from_u128(n))
    }

    fn seen(ip_addr: &str, t: u128) -> SessionObservation {
        SessionObservation {
            ip: ip(ip_addr),
            tenant: tenant(t),
            rejected: false,
        }
    }

    fn monitor() -> SessionSecurityMonitor {
        SessionSecurityMonitor::new(
            Arc::new(MemoryCache::new(&MemoryCacheConfig::default())),
            SessionSecurityConfig::default(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_first_observation_pins_ip() {
        let mut record = SessionSecurityRecord::default();
        let config = SessionSecurityConfig::default();
        let a = record.observe(&seen("10.0.0.1", 1), &config, Utc::now());
        assert!(!a.is_denied());
        assert_eq!(record.origin_ip, ip("10.0.0.1"));
        assert_eq!(record.last_tenant, tenant(1));
        assert_eq!(record.switch_count, 0);
    }

    #[test]
    fn test_ip_change_denied_without_reset() {
        let config = SessionSecurityConfig::default();
        let now = Utc::now();
        let mut record = SessionSecurityRecord::default();
        record.observe(&seen("10.0.0.1", 1), &config, now);
        let before = record.clone();

        let a = record.observe(&seen("10.0.0.2", 2), &config, now);
        assert!(matches!(
            a.violation,
            Some(SessionViolation::IpMismatch { .. })
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_ip_pinning_disabled() {
        let config = SessionSecurityConfig {
            ip_pinning: false,
            ..Default::default()
        };
        let now = Utc::now();
        let mut record = SessionSecurityRecord::default();
        record.observe(&seen("10.0.0.1", 1), &config, now);
        assert!(!record.observe(&seen("10.0.0.2", 1), &config, now).is_denied());
    }

    #[test]
    fn test_switch_velocity_threshold() {
        let config = SessionSecurityConfig::default(); // 5 per 900s
        let start = Utc::now();
        let mut record = SessionSecurityRecord::default();
        record.observe(&seen("10.0.0.1", 0), &config, start);

        for i in 1..=5u32 {
            let at = start + chrono::Duration::seconds(i64::from(i) * 10);
            let a = record.observe(&seen("10.0.0.1", u128::from(i % 2)), &config, at);
            assert!(!a.is_denied(), "switch {i} should be tolerated");
        }
        assert_eq!(record.switch_count, 5);

        let sixth = record.observe(&seen("10.0.0.1", 0), &config, start + chrono::Duration::seconds(60));
        assert_eq!(
            sixth.violation,
            Some(SessionViolation::SwitchVelocity { switches: 6 })
        );

        // Staying on one tenant does not clear the denial inside the window
        let same = record.observe(&seen("10.0.0.1", 0), &config, start + chrono::Duration::seconds(70));
        assert!(same.is_denied());
    }

    #[test]
    fn test_switch_outside_window_starts_new_run() {
        let config = SessionSecurityConfig::default();
        let start = Utc::now();
        let mut record = SessionSecurityRecord::default();
        record.observe(&seen("10.0.0.1", 0), &config, start);
        for i in 1..=5u32 {
            record.observe(&seen("10.0.0.1", u128::from(i % 2)), &config, start);
        }

        let later = start + chrono::Duration::seconds(901);
        let a = record.observe(&seen("10.0.0.1", 0), &config, later);
        assert!(!a.is_denied());
        assert_eq!(record.switch_count, 1);
        assert_eq!(record.first_switch_at, Some(later));
    }

    #[test]
    fn test_rejections_escalate_at_threshold() {
        let config = SessionSecurityConfig::default(); // threshold 3
        let now = Utc::now();
        let mut record = SessionSecurityRecord::default();
        let rejected = SessionObservation {
            ip: ip("10.0.0.1"),
            tenant: None,
            rejected: true,
        };

        assert!(!record.observe(&rejected, &config, now).escalated);
        assert!(!record.observe(&rejected, &config, now).escalated);
        let third = record.observe(&rejected, &config, now);
        assert!(third.escalated);
        assert!(!third.is_denied(), "escalation alerts but does not block");
        assert_eq!(third.invalid_attempts, 3);
        assert_eq!(record.switch_count, 0);
    }

    #[tokio::test]
    async fn test_monitor_persists_between_requests() {
        let monitor = monitor();
        let alert = AlertContext::default();

        let first = monitor.observe("sess-1", seen("10.0.0.1", 1), &alert).await;
        assert!(!first.is_denied());

        let hijack = monitor.observe("sess-1", seen("192.0.2.7", 1), &alert).await;
        assert!(matches!(
            hijack.violation,
            Some(SessionViolation::IpMismatch { .. })
        ));

        // Other sessions are unaffected
        let other = monitor.observe("sess-2", seen("192.0.2.7", 1), &alert).await;
        assert!(!other.is_denied());
    }

    #[tokio::test]
    async fn test_concurrent_rejections_all_counted() {
        let monitor = Arc::new(monitor());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move {
                monitor
                    .observe(
                        "sess-c",
                        SessionObservation {
                            ip: ip("10.0.0.1"),
                            tenant: None,
                            rejected: true,
                        },
                        &AlertContext::default(),
                    )
                    .await
                    .invalid_attempts
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
    }
}
