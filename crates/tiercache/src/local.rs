//! Local (L1) tier: a bounded, in-process map with per-entry expiry.
//!
//! Backed by moka, which synchronizes internally; callers share one
//! `LocalStore` (it is cheap to clone) without any locking of their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;
use tiercache_store::GlobPattern;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Arc<Value>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct EntryExpiry;

impl Expiry<String, LocalEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct LocalStore {
    cache: Cache<String, LocalEntry>,
    default_ttl: Duration,
}

impl LocalStore {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryExpiry)
                .build(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    /// Stores `value` for `ttl`; a zero TTL means the default.
    pub async fn insert(&self, key: &str, value: Arc<Value>, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        self.cache
            .insert(key.to_string(), LocalEntry { value, ttl })
            .await;
    }

    pub async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Removes every entry whose key matches `pattern`. Returns how many.
    pub async fn purge_matching(&self, pattern: &GlobPattern) -> usize {
        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key)
            .collect();
        for key in &matching {
            self.cache.invalidate(key.as_str()).await;
        }
        matching.len()
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Applies pending evictions so `entry_count` is exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
