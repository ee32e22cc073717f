//! Token-bucket request throttling.
//!
//! Buckets live in the shared [`Cache`] so every instance behind a load
//! balancer draws from the same allowance. Each consume is a single
//! compare-and-swap update of the bucket record.

mod bucket;

use std::{
    fmt,
    net::IpAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub use bucket::{TokenBucket, retry_after_secs};

use crate::{
    cache::{Cache, CacheError, CacheKeys},
    config::{RateLimitConfig, TierLimits},
    observability::metrics,
};

/// Allowance tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Unauthenticated requests and authentication endpoints.
    Public,
    Standard,
    /// Principals holding an administrative role.
    Premium,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
        }
    }

    /// Pick the tier by priority: public, then premium, then standard.
    pub fn select(authenticated: bool, public_path: bool, admin: bool) -> Self {
        if !authenticated || public_path {
            Tier::Public
        } else if admin {
            Tier::Premium
        } else {
            Tier::Standard
        }
    }
}

/// Whose allowance a request draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketKey {
    Principal(String),
    Ip(IpAddr),
    /// One bucket shared by every anonymous caller.
    Anonymous,
}

impl BucketKey {
    pub fn derive(principal: Option<&str>, ip: Option<IpAddr>, per_ip: bool) -> Self {
        match (principal, ip) {
            (Some(id), _) => BucketKey::Principal(id.to_string()),
            (None, Some(ip)) if per_ip => BucketKey::Ip(ip),
            _ => BucketKey::Anonymous,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Principal(id) => write!(f, "user:{id}"),
            BucketKey::Ip(ip) => write!(f, "ip:{ip}"),
            BucketKey::Anonymous => write!(f, "anonymous"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Whole seconds until the next token, rounded up. Zero when allowed.
    pub retry_after_secs: u64,
    /// The store could not be consulted and the request was let through.
    pub degraded: bool,
}

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn limits(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Public => &self.config.public,
            Tier::Standard => &self.config.standard,
            Tier::Premium => &self.config.premium,
        }
    }

    /// Take one token from the bucket of `key` in `tier`.
    pub async fn try_consume(&self, key: &BucketKey, tier: Tier) -> RateLimitDecision {
        self.try_consume_at(key, tier, now_nanos()).await
    }

    pub async fn try_consume_at(
        &self,
        key: &BucketKey,
        tier: Tier,
        now_nanos: u64,
    ) -> RateLimitDecision {
        let limits = *self.limits(tier);
        // Tiers have separate buckets so a principal promoted to premium
        // does not inherit a drained standard bucket
        let cache_key = CacheKeys::rate_limit_bucket(&format!("{}:{key}", tier.as_str()));
        let timeout = Duration::from_millis(self.config.store_timeout_ms);

        let update = self.cache.update_json::<TokenBucket, _, _>(
            &cache_key,
            bucket_ttl(&limits),
            |current| {
                let mut bucket =
                    current.unwrap_or_else(|| TokenBucket::full(&limits, now_nanos));
                let outcome = bucket.try_take(&limits, now_nanos);
                (bucket, outcome)
            },
        );

        let result = match tokio::time::timeout(timeout, update).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        };

        match result {
            Ok(Ok(remaining)) => {
                metrics::record_rate_limit("allowed", tier.as_str());
                RateLimitDecision {
                    allowed: true,
                    remaining,
                    limit: limits.capacity,
                    retry_after_secs: 0,
                    degraded: false,
                }
            }
            Ok(Err(wait_nanos)) => {
                metrics::record_rate_limit("limited", tier.as_str());
                tracing::debug!(
                    key = %key,
                    tier = tier.as_str(),
                    wait_nanos,
                    "Rate limit exceeded"
                );
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    limit: limits.capacity,
                    retry_after_secs: retry_after_secs(wait_nanos),
                    degraded: false,
                }
            }
            Err(e) => {
                metrics::record_rate_limit("degraded", tier.as_str());
                metrics::record_store_error("rate_limit", "update");
                tracing::warn!(
                    error = %e,
                    backend = self.cache.backend_name(),
                    tier = tier.as_str(),
                    "Rate limit store unavailable, allowing request"
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: limits.capacity,
                    limit: limits.capacity,
                    retry_after_secs: 0,
                    degraded: true,
                }
            }
        }
    }
}

/// How long an idle bucket is kept: the time to refill from empty.
/// A bucket evicted after that is indistinguishable from a full one.
fn bucket_ttl(limits: &TierLimits) -> Duration {
    let nanos = limits
        .nanos_per_token()
        .saturating_mul(u64::from(limits.capacity));
    Duration::from_nanos(nanos).max(Duration::from_secs(1))
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        cache::{CacheResult, MemoryCache},
        config::MemoryCacheConfig,
    };

    const SEC: u64 = 1_000_000_000;

    fn limiter(public_capacity: u32) -> RateLimiter {
        let config = RateLimitConfig {
            public: TierLimits {
                capacity: public_capacity,
                refill_tokens: public_capacity,
                refill_period_secs: 60,
            },
            ..Default::default()
        };
        RateLimiter::new(
            Arc::new(MemoryCache::new(&MemoryCacheConfig::default())),
            config,
        )
    }

    #[rstest::rstest]
    #[case::anonymous(false, false, false, Tier::Public)]
    #[case::anonymous_admin_path(false, false, true, Tier::Public)]
    #[case::auth_endpoint(true, true, true, Tier::Public)]
    #[case::admin(true, false, true, Tier::Premium)]
    #[case::user(true, false, false, Tier::Standard)]
    fn test_tier_selection(
        #[case] authenticated: bool,
        #[case] public_path: bool,
        #[case] admin: bool,
        #[case] expected: Tier,
    ) {
        assert_eq!(Tier::select(authenticated, public_path, admin), expected);
    }

    #[test]
    fn test_bucket_key_priority() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        assert_eq!(
            BucketKey::derive(Some("u1"), Some(ip), true).to_string(),
            "user:u1"
        );
        assert_eq!(
            BucketKey::derive(None, Some(ip), true).to_string(),
            "ip:203.0.113.9"
        );
        assert_eq!(
            BucketKey::derive(None, Some(ip), false),
            BucketKey::Anonymous
        );
        assert_eq!(BucketKey::derive(None, None, true), BucketKey::Anonymous);
    }

    #[tokio::test]
    async fn test_exhaustion_and_retry_after() {
        let limiter = limiter(2);
        let key = BucketKey::Ip("198.51.100.1".parse().unwrap());
        let now = 5_000 * SEC;

        let first = limiter.try_consume_at(&key, Tier::Public, now).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.limit, 2);

        assert!(limiter.try_consume_at(&key, Tier::Public, now).await.allowed);

        let denied = limiter.try_consume_at(&key, Tier::Public, now + SEC / 10).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        // 30s per token, 0.1s already elapsed: 29.9s rounds up to 30
        assert_eq!(denied.retry_after_secs, 30);

        let later = limiter.try_consume_at(&key, Tier::Public, now + 30 * SEC).await;
        assert!(later.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = limiter(1);
        let now = 5_000 * SEC;
        let a = BucketKey::Principal("a".into());
        let b = BucketKey::Principal("b".into());

        assert!(limiter.try_consume_at(&a, Tier::Public, now).await.allowed);
        assert!(!limiter.try_consume_at(&a, Tier::Public, now).await.allowed);
        assert!(limiter.try_consume_at(&b, Tier::Public, now).await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_overspend() {
        let limiter = Arc::new(limiter(50));
        let key = BucketKey::Anonymous;
        let now = 5_000 * SEC;

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                limiter.try_consume_at(&key, Tier::Public, now).await.allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get_bytes(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Internal("down".into()))
        }
        async fn set_bytes(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Internal("down".into()))
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Internal("down".into()))
        }
        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&[u8]>,
            _new: &[u8],
            _ttl: Duration,
        ) -> CacheResult<bool> {
            Err(CacheError::Internal("down".into()))
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenCache), RateLimitConfig::default());
        let decision = limiter
            .try_consume(&BucketKey::Anonymous, Tier::Standard)
            .await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.limit, 100);
    }
}
