use sha2::{Digest, Sha256};

/// Store key layout.
///
/// Client-supplied values (session ids, login names) are hashed so they
/// cannot collide with other key families or blow up key length.
pub struct CacheKeys;

impl CacheKeys {
    /// Token bucket: ratelimit:{bucket_key}
    ///
    /// `bucket_key` is already namespaced (`user:<id>`, `ip:<addr>`, `anonymous`).
    pub fn rate_limit_bucket(bucket_key: &str) -> String {
        format!("ratelimit:{{{}}}", bucket_key)
    }

    /// Session security record: session:{sha256(session_id)}
    pub fn session_security(session_id: &str) -> String {
        format!("session:{}", digest(session_id))
    }

    /// Login attempt record: login:{sha256(lowercased identity)}
    pub fn login_attempts(identity: &str) -> String {
        format!("login:{}", digest(&identity.to_lowercase()))
    }

    /// Order in which a bounded store gives up keys when full, lowest first.
    ///
    /// Session records are keyed by client-chosen ids and go first, so a
    /// flood of fresh sessions cannot push out buckets or login locks.
    pub fn eviction_rank(key: &str) -> u8 {
        if key.starts_with("session:") {
            0
        } else if key.starts_with("ratelimit:") {
            1
        } else if key.starts_with("login:") {
            3
        } else {
            2
        }
    }
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
