use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::error::{CacheError, CacheResult};

/// Maximum number of compare-and-swap attempts in `update_json` before giving up. Prevents unbounded spinning on a hot key.
pub const MAX_CAS_RETRIES: usize = 100;

/// Shared store for pipeline state (rate-limit buckets, session security
/// records, login attempt records).
///
/// Every read-modify-write goes through [`compare_and_swap`](Cache::compare_and_swap),
/// so concurrent requests for the same key never lose an update, whether the
/// store is process-local or shared between instances.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from the store
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes with TTL (zero TTL means no expiry)
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically replace the value at `key` with `new` if and only if the
    /// current value equals `expected` (`None` meaning "absent or expired").
    ///
    /// Returns true if the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

// JSON helpers. Implemented on the trait object so the returned futures are
// concrete and `Send`, which axum middleware requires.
impl dyn Cache {
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }

    /// Read-modify-write a JSON value with optimistic concurrency.
    ///
    /// `f` receives the current value (or `None`) and returns the value to
    /// store along with a result for the caller. It may run several times if
    /// other writers race on the same key, so it must be free of side effects.
    /// Nothing is written unless a swap succeeds.
    pub async fn update_json<T, R, F>(&self, key: &str, ttl: Duration, mut f: F) -> CacheResult<R>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnMut(Option<T>) -> (T, R) + Send,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let current = self.get_bytes(key).await?;
            let decoded = match &current {
                Some(bytes) => Some(
                    serde_json::from_slice::<T>(bytes)
                        .map_err(|e| CacheError::Deserialization(e.to_string()))?,
                ),
                None => None,
            };

            let (next, result) = f(decoded);
            let bytes =
                serde_json::to_vec(&next).map_err(|e| CacheError::Serialization(e.to_string()))?;

            if self
                .compare_and_swap(key, current.as_deref(), &bytes, ttl)
                .await?
            {
                return Ok(result);
            }

            tokio::task::yield_now().await;
        }

        Err(CacheError::Internal(format!(
            "update of '{key}' failed: CAS retries exhausted under contention"
        )))
    }
}
