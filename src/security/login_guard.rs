use std::{net::IpAddr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{
    cache::{Cache, CacheError, CacheKeys},
    config::LoginGuardConfig,
    observability::{
        metrics,
        security::{self, AlertContext, SecurityEvent},
    },
};

/// Consecutive failed logins for one identity or one IP, plus the attempts
/// currently past the guard whose outcome is not yet known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Attempts admitted but not yet settled; each counts as a failure until
    /// it is.
    #[serde(default)]
    pub in_flight: u32,
    #[serde(default)]
    pub in_flight_until: Option<DateTime<Utc>>,
}

/// How long an unsettled attempt holds its slot beyond the maximum delay.
/// Covers requests whose client disconnected mid-attempt.
const IN_FLIGHT_GRACE_SECS: u64 = 30;

impl LoginAttemptRecord {
    /// Failures older than the window no longer count.
    fn is_stale(&self, config: &LoginGuardConfig, now: DateTime<Utc>) -> bool {
        self.last_failure_at.is_none_or(|at| {
            now.signed_duration_since(at) > secs(config.window_secs)
        }) && !self.is_locked(now)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Unsettled attempts that have not outlived their hold.
    pub fn in_flight(&self, now: DateTime<Utc>) -> u32 {
        if self.in_flight_until.is_some_and(|until| until > now) {
            self.in_flight
        } else {
            0
        }
    }

    /// Progressive delay owed before the next attempt:
    /// `base * 2^(failures - 1)`, capped.
    pub fn delay(&self, config: &LoginGuardConfig) -> Duration {
        delay_for(self.failures, config)
    }

    fn expire(&mut self, config: &LoginGuardConfig, now: DateTime<Utc>) {
        if self.is_stale(config, now) {
            self.failures = 0;
            self.last_failure_at = None;
            self.locked_until = None;
        }
        if self.in_flight(now) == 0 {
            self.in_flight = 0;
            self.in_flight_until = None;
        }
    }

    /// Admit one attempt if neither the lock nor the failures already owed,
    /// settled or not, forbid it.
    fn admit(&mut self, config: &LoginGuardConfig, now: DateTime<Utc>) -> Admission {
        self.expire(config, now);
        if self.is_locked(now) {
            return Admission::Locked(self.locked_until);
        }

        let owed = self.failures.saturating_add(self.in_flight);
        if owed >= config.lock_threshold {
            return Admission::Saturated;
        }

        self.in_flight += 1;
        self.in_flight_until =
            Some(now + secs(config.max_delay_secs.saturating_add(IN_FLIGHT_GRACE_SECS)));
        Admission::Granted(delay_for(owed, config))
    }

    fn settle(&mut self, now: DateTime<Utc>) {
        if self.in_flight(now) > 0 {
            self.in_flight -= 1;
        }
    }

    fn record_failure(&mut self, config: &LoginGuardConfig, now: DateTime<Utc>) {
        self.expire(config, now);
        self.failures = self.failures.saturating_add(1);
        self.last_failure_at = Some(now);
        if self.failures >= config.lock_threshold && !self.is_locked(now) {
            self.locked_until = Some(now + secs(config.lock_duration_secs));
        }
    }

    fn clear_failures(&mut self) {
        self.failures = 0;
        self.last_failure_at = None;
        self.locked_until = None;
    }
}

fn delay_for(failures: u32, config: &LoginGuardConfig) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let shift = (failures - 1).min(32);
    let ms = config.base_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(ms).min(Duration::from_secs(config.max_delay_secs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Granted(Duration),
    Locked(Option<DateTime<Utc>>),
    /// Enough attempts are already unsettled to reach the lock threshold.
    Saturated,
}

/// How an admitted attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    /// Neither: the attempt was cancelled or the handler did not judge the
    /// credentials.
    Abandoned,
}

/// Result of consulting the guard before a login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginCheck {
    pub blocked: bool,
    /// Delay to apply before the attempt proceeds.
    pub delay: Duration,
    pub reason: Option<String>,
    pub lock_expiry: Option<DateTime<Utc>>,
}

impl LoginCheck {
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        self.lock_expiry
            .map(|until| {
                let ms = until.signed_duration_since(now).num_milliseconds().max(0);
                (ms as u64).div_ceil(1000)
            })
            .unwrap_or_else(|| self.delay.as_secs_f64().ceil() as u64)
            .max(1)
    }
}

/// Progressive delay and lockout for the login endpoint.
///
/// Records are kept per identity and per client IP; an attempt owes the
/// larger of the two delays and is blocked if either is locked.
///
/// Admission is a single read-modify-write per record: an admitted attempt
/// is counted as in flight until [`finish`](Self::finish) settles it, so
/// concurrent guesses cannot all slip in under the lock threshold.
pub struct LoginAttemptGuard {
    cache: Arc<dyn Cache>,
    config: LoginGuardConfig,
    timeout: Duration,
    /// Locks this instance has set or seen, consulted when the store is down.
    known_locks: DashMap<String, DateTime<Utc>>,
}

impl LoginAttemptGuard {
    pub fn new(cache: Arc<dyn Cache>, config: LoginGuardConfig, timeout: Duration) -> Self {
        Self {
            cache,
            config,
            timeout,
            known_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoginGuardConfig {
        &self.config
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.window_secs.max(self.config.lock_duration_secs))
    }

    /// Admit a login attempt or refuse it. Every admitted attempt must be
    /// settled with [`finish`](Self::finish).
    pub async fn check_attempt(&self, identity: Option<&str>, ip: Option<IpAddr>) -> LoginCheck {
        self.check_attempt_at(identity, ip, Utc::now()).await
    }

    pub async fn check_attempt_at(
        &self,
        identity: Option<&str>,
        ip: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> LoginCheck {
        let mut check = LoginCheck::default();
        let mut admitted = Vec::new();

        for key in record_keys(identity, ip) {
            let admission = match self.admit(&key, now).await {
                Ok(admission) => admission,
                Err(e) => {
                    metrics::record_store_error("login_guard", "update");
                    tracing::warn!(error = %e, "Login attempt store unavailable");
                    // Delay fails open; a lock seen earlier still holds
                    match self.known_locks.get(&key) {
                        Some(until) if *until > now => Admission::Locked(Some(*until)),
                        _ => continue,
                    }
                }
            };

            match admission {
                Admission::Granted(delay) => {
                    check.delay = check.delay.max(delay);
                    admitted.push(key);
                }
                Admission::Locked(until) => {
                    if let Some(until) = until {
                        self.known_locks.insert(key, until);
                    }
                    check.blocked = true;
                    check.lock_expiry = check.lock_expiry.max(until);
                    check.reason = Some(
                        "Too many failed login attempts. The account is temporarily locked."
                            .to_string(),
                    );
                }
                Admission::Saturated => {
                    check.blocked = true;
                    if check.reason.is_none() {
                        check.reason = Some(
                            "Too many login attempts in progress. Try again shortly.".to_string(),
                        );
                    }
                }
            }
        }

        if check.blocked {
            // Give back the slots taken on the other record
            check.delay = Duration::ZERO;
            for key in &admitted {
                self.settle(key, AttemptOutcome::Abandoned, now).await;
            }
        }

        let outcome = if check.blocked {
            "blocked"
        } else if check.delay > Duration::ZERO {
            "delayed"
        } else {
            "allowed"
        };
        metrics::record_login_guard(outcome);

        check
    }

    /// The attempt succeeded: the identity's failures are cleared.
    pub async fn record_success(&self, identity: Option<&str>, ip: Option<IpAddr>) {
        self.finish(identity, ip, AttemptOutcome::Success).await
    }

    /// The attempt was refused by the login handler.
    pub async fn record_failure(&self, identity: Option<&str>, ip: Option<IpAddr>) {
        self.finish(identity, ip, AttemptOutcome::Failure).await
    }

    /// Settle an admitted attempt.
    ///
    /// A success clears the identity's failures but keeps the IP's, so one
    /// valid account cannot be used to reset throttling for guesses against
    /// others.
    pub async fn finish(&self, identity: Option<&str>, ip: Option<IpAddr>, outcome: AttemptOutcome) {
        self.finish_at(identity, ip, outcome, Utc::now()).await
    }

    pub async fn finish_at(
        &self,
        identity: Option<&str>,
        ip: Option<IpAddr>,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) {
        match outcome {
            AttemptOutcome::Success => metrics::record_login_guard("success"),
            AttemptOutcome::Failure => metrics::record_login_guard("failure"),
            AttemptOutcome::Abandoned => {}
        }

        let identity_key = identity
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CacheKeys::login_attempts);

        for key in record_keys(identity, ip) {
            let outcome = match outcome {
                AttemptOutcome::Success if Some(&key) != identity_key.as_ref() => {
                    AttemptOutcome::Abandoned
                }
                other => other,
            };
            if outcome == AttemptOutcome::Success {
                self.known_locks.remove(&key);
            }

            let Some((record, newly_locked)) = self.settle(&key, outcome, now).await else {
                continue;
            };
            if outcome != AttemptOutcome::Failure {
                continue;
            }

            tracing::debug!(
                failures = record.failures,
                locked = record.is_locked(now),
                "Recorded failed login"
            );
            if let Some(until) = record.locked_until.filter(|u| *u > now) {
                self.known_locks.insert(key.clone(), until);
            }
            if newly_locked {
                security::emit(
                    SecurityEvent::LoginLocked,
                    &AlertContext {
                        principal: identity.map(str::to_string),
                        ip,
                        ..Default::default()
                    },
                    &format!(
                        "Login locked after {} failures until {}",
                        record.failures,
                        record
                            .locked_until
                            .map(|u| u.to_rfc3339())
                            .unwrap_or_default()
                    ),
                );
            }
        }
    }

    async fn admit(&self, key: &str, now: DateTime<Utc>) -> Result<Admission, CacheError> {
        let config = &self.config;
        let update = self
            .cache
            .update_json::<LoginAttemptRecord, _, _>(key, self.ttl(), |current| {
                let mut record = current.unwrap_or_default();
                let admission = record.admit(config, now);
                (record, admission)
            });
        match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    /// Release one in-flight slot on `key` and apply the outcome. Returns the
    /// stored record and whether this update set the lock.
    async fn settle(
        &self,
        key: &str,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Option<(LoginAttemptRecord, bool)> {
        let config = &self.config;
        let update = self
            .cache
            .update_json::<LoginAttemptRecord, _, _>(key, self.ttl(), |current| {
                let mut record = current.unwrap_or_default();
                let was_locked = record.is_locked(now);
                record.settle(now);
                match outcome {
                    AttemptOutcome::Success => record.clear_failures(),
                    AttemptOutcome::Failure => record.record_failure(config, now),
                    AttemptOutcome::Abandoned => {}
                }
                let newly_locked = !was_locked && record.is_locked(now);
                let snapshot = record.clone();
                (record, (snapshot, newly_locked))
            });

        let result = match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        };
        match result {
            Ok(settled) => Some(settled),
            Err(e) => {
                metrics::record_store_error("login_guard", "update");
                tracing::warn!(error = %e, "Failed to settle login attempt");
                None
            }
        }
    }
}

fn record_keys(identity: Option<&str>, ip: Option<IpAddr>) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if let Some(identity) = identity.map(str::trim).filter(|s| !s.is_empty()) {
        keys.push(CacheKeys::login_attempts(identity));
    }
    if let Some(ip) = ip {
        keys.push(CacheKeys::login_attempts(&format!("ip:{ip}")));
    }
    keys
}

fn secs(n: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(n).unwrap_or(i64::MAX))
}
