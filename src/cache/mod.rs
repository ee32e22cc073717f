mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{Cache, MAX_CAS_RETRIES};

use crate::config::CacheConfig;

/// Build the configured store.
pub async fn create_cache(config: &CacheConfig) -> CacheResult<Arc<dyn Cache>> {
    match config {
        CacheConfig::Memory(memory) => Ok(Arc::new(MemoryCache::new(memory))),
        #[cfg(feature = "redis")]
        CacheConfig::Redis(redis) => Ok(Arc::new(RedisCache::from_config(redis).await?)),
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::Internal(
            "cache type 'redis' requires the 'redis' feature".into(),
        )),
    }
}
