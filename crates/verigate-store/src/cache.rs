//! Bounded in-memory layer in front of `verification_data_cache`.
//!
//! Payloads are immutable once stored under their hash, so a TTL'd
//! [`moka`] map needs no invalidation: an entry is either absent or right.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::StoreResult;
use crate::types::ContentHash;

/// Sizing for [`HotCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotCacheConfig {
    pub max_entries: u64,
    pub ttl_seconds: u64,
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: 300,
        }
    }
}

/// Lookup counters of a [`HotCache`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Share of lookups answered from memory; 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.hits() + self.misses() {
            0 => 0.0,
            lookups => self.hits() as f64 / lookups as f64,
        }
    }
}

/// Payloads keyed by content hash.
#[derive(Clone)]
pub struct HotCache {
    entries: Cache<ContentHash, Arc<str>>,
    stats: Arc<CacheStats>,
}

impl HotCache {
    pub fn new(config: HotCacheConfig) -> Self {
        debug!(
            max_entries = config.max_entries,
            ttl_seconds = config.ttl_seconds,
            "hot cache created"
        );
        Self {
            entries: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(Duration::from_secs(config.ttl_seconds))
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, hash: &ContentHash) -> Option<Arc<str>> {
        let found = self.entries.get(hash).await;
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(hash = %hash, hit = found.is_some(), "hot cache lookup");
        found
    }

    pub async fn insert(&self, hash: ContentHash, payload: Arc<str>) {
        self.entries.insert(hash, payload).await;
    }

    /// Serve `hash` from memory, or run `load` and keep what it returns.
    /// Errors from `load` pass through and leave nothing behind.
    pub async fn get_or_load<F, Fut>(&self, hash: &ContentHash, load: F) -> StoreResult<Arc<str>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<Arc<str>>>,
    {
        if let Some(payload) = self.get(hash).await {
            return Ok(payload);
        }
        let payload = load().await?;
        self.insert(hash.clone(), Arc::clone(&payload)).await;
        Ok(payload)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Approximate; moka applies evictions lazily.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}
