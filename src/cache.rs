//! `TransformationCache`: `(tenantId, fingerprint) -> Projection`
//! cache used ahead of the enumerator. Advisory — a miss just
//! means the orchestrator builds the projection directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::graph_store::Projection;
use crate::types::TenantId;

#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_entries: 100,
        }
    }
}

struct Entry {
    projection: Projection,
    inserted_at: Instant,
    hits: AtomicU64,
}

impl Entry {
    /// LRFU-ish eviction score: `age / (hits + 1)`. The cache evicts the
    /// *minimum*-scoring entry on overflow.
    fn score(&self, now: Instant) -> f64 {
        let age = now.duration_since(self.inserted_at).as_secs_f64();
        age / (self.hits.load(Ordering::Relaxed) as f64 + 1.0)
    }
}

/// Cache of derived projections, keyed by `(tenantId, fingerprint)`.
pub struct TransformationCache {
    entries: DashMap<(TenantId, u64), Entry>,
    config: CacheConfig,
}

impl TransformationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Returns a defensive deep copy of the cached projection, or `None`
    /// on miss/expiry.
    pub fn get(&self, tenant_id: &TenantId, fingerprint: u64) -> Option<Projection> {
        let key = (tenant_id.clone(), fingerprint);
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.config.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.projection.clone())
    }

    pub fn insert(&self, tenant_id: &TenantId, fingerprint: u64, projection: Projection) {
        let key = (tenant_id.clone(), fingerprint);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                projection,
                inserted_at: Instant::now(),
                hits: AtomicU64::new(0),
            },
        );
    }

    fn evict_one(&self) {
        let now = Instant::now();
        let victim = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().score(now)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(key, _)| key);
        if let Some(key) = victim {
            debug!(?key, "transformation_cache: evicting entry");
            self.entries.remove(&key);
        }
    }

    /// Invalidates every entry belonging to `tenant_id` — any mutation
    /// invalidates the whole tenant's cache entries.
    pub fn invalidate_tenant(&self, tenant_id: &TenantId) {
        self.entries.retain(|(t, _), _| t != tenant_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_deep_copy() {
        let cache = TransformationCache::new(CacheConfig::default());
        let tenant = "t1".to_string();
        cache.insert(&tenant, 42, Projection::default());
        let first = cache.get(&tenant, 42).unwrap();
        let second = cache.get(&tenant, 42).unwrap();
        assert_eq!(first.wallets, second.wallets);
    }

    #[test]
    fn miss_on_unknown_fingerprint() {
        let cache = TransformationCache::new(CacheConfig::default());
        assert!(cache.get(&"t1".to_string(), 1).is_none());
    }

    #[test]
    fn invalidate_tenant_clears_only_that_tenant() {
        let cache = TransformationCache::new(CacheConfig::default());
        cache.insert(&"t1".to_string(), 1, Projection::default());
        cache.insert(&"t2".to_string(), 1, Projection::default());
        cache.invalidate_tenant(&"t1".to_string());
        assert!(cache.get(&"t1".to_string(), 1).is_none());
        assert!(cache.get(&"t2".to_string(), 1).is_some());
    }

    #[test]
    fn evicts_when_over_capacity() {
        let cache = TransformationCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        cache.insert(&"t1".to_string(), 1, Projection::default());
        cache.insert(&"t1".to_string(), 2, Projection::default());
        cache.insert(&"t1".to_string(), 3, Projection::default());
        assert_eq!(cache.len(), 2);
    }
}
