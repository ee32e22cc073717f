use serde::{Deserialize, Serialize};

use crate::config::TierLimits;

/// Persisted token-bucket state.
///
/// Time is kept in whole nanoseconds since the Unix epoch so every instance
/// sharing a store agrees on it without floating-point drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub tokens: u32,
    pub last_refill_nanos: u64,
}

impl TokenBucket {
    pub fn full(limits: &TierLimits, now_nanos: u64) -> Self {
        Self {
            tokens: limits.capacity,
            last_refill_nanos: now_nanos,
        }
    }

    /// Credit tokens earned since the last refill.
    ///
    /// Only whole tokens are credited; the remainder carries over by
    /// advancing `last_refill_nanos` by exactly the time they cost.
    pub fn refill(&mut self, limits: &TierLimits, now_nanos: u64) {
        let per_token = limits.nanos_per_token();
        let elapsed = now_nanos.saturating_sub(self.last_refill_nanos);
        let earned = elapsed / per_token;

        if earned > 0 {
            let tokens = u64::from(self.tokens).saturating_add(earned);
            self.tokens = tokens.min(u64::from(limits.capacity)) as u32;
            self.last_refill_nanos = self
                .last_refill_nanos
                .saturating_add(earned.saturating_mul(per_token));
        }

        // A full bucket earns nothing; the clock restarts when it drains
        if self.tokens >= limits.capacity {
            self.tokens = limits.capacity;
            self.last_refill_nanos = now_nanos;
        }
    }

    /// Refill, then take one token.
    ///
    /// Returns the tokens left on success, or the nanoseconds until the next
    /// token becomes available (at least 1) on exhaustion.
    pub fn try_take(&mut self, limits: &TierLimits, now_nanos: u64) -> Result<u32, u64> {
        self.refill(limits, now_nanos);
        if self.tokens > 0 {
            self.tokens -= 1;
            Ok(self.tokens)
        } else {
            let next = self
                .last_refill_nanos
                .saturating_add(limits.nanos_per_token());
            Err(next.saturating_sub(now_nanos).max(1))
        }
    }
}

/// Whole seconds a client should wait, rounded up and never zero.
pub fn retry_after_secs(wait_nanos: u64) -> u64 {
    wait_nanos.div_ceil(1_000_000_000).max(1)
}
