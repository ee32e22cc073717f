use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{error::CacheResult, keys::CacheKeys, traits::Cache};
use crate::config::MemoryCacheConfig;

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            expires_at: (!ttl.is_zero()).then(|| now + ttl),
            last_accessed: now,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// In-memory store using DashMap for concurrent access.
///
/// # Multi-Node Deployments
///
/// **WARNING**: This store is NOT suitable for multi-node deployments.
///
/// Each node keeps its own buckets and session records, so:
/// - Rate limits are enforced per node, not globally
/// - A hijacked session used against another node is not IP-pinned there
/// - Tenant-switch velocity is split across nodes
///
/// See [`CacheConfig::Redis`](crate::config::CacheConfig::Redis) for shared state.
pub struct MemoryCache {
    data: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries
        self.data.retain(|_, entry| !entry.is_expired());

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);
        if to_evict == 0 {
            return;
        }

        // Lowest rank first, oldest first within a rank
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| {
                let key = entry.key().clone();
                (CacheKeys::eviction_rank(&key), entry.last_accessed, key)
            })
            .collect();
        entries.sort_unstable();

        for (_, _, key) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(mut entry) = self.data.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove_if(key, |_, e| e.is_expired());
                return Ok(None);
            }

            entry.touch();
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed();
        self.data
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool> {
        // Must run before taking the entry's shard lock
        self.evict_if_needed();

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let matches = {
                    let entry = e.get();
                    let current = (!entry.is_expired()).then_some(entry.data.as_slice());
                    current == expected
                };
                if !matches {
                    return Ok(false);
                }
                e.insert(CacheEntry::new(new.to_vec(), ttl));
                Ok(true)
            }
            Entry::Vacant(e) => {
                if expected.is_some() {
                    return Ok(false);
                }
                e.insert(CacheEntry::new(new.to_vec(), ttl));
                Ok(true)
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
