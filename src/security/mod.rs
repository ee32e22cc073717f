//! Stateful defences: per-session anomaly detection and login brute-force
//! protection. Both keep their records in the shared store.

mod login_guard;
mod session_monitor;

pub use login_guard::{AttemptOutcome, LoginAttemptGuard, LoginAttemptRecord, LoginCheck};
pub use session_monitor::{
    SessionAssessment, SessionObservation, SessionSecurityMonitor, SessionSecurityRecord,
    SessionViolation,
};
