//! Reads and writes for the same key racing each other.
//!
//! `ControlledStore` wraps `MemoryStore` and can park the next remote read
//! after it has fetched its value, or fail individual commands, so the tests
//! can place a write exactly inside a read's window.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tiercache::{
    BackingStore, CacheConfig, InvalidationMessage, InvalidationScope, LocalStore, MemoryStore,
    StoreError, TieredCache,
};
use tiercache_store::{KeyTtl, ScanPage};
use tokio::sync::Notify;

type StoreResult<T> = Result<T, StoreError>;

const HOUR: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct ControlledStore {
    inner: MemoryStore,
    hold_next_read: AtomicBool,
    read_parked: Notify,
    resume_read: Notify,
    fail_del: AtomicBool,
    fail_srem: AtomicBool,
}

impl ControlledStore {
    fn hold_next_read(&self) {
        self.hold_next_read.store(true, Ordering::SeqCst);
    }

    fn injected(&self, flag: &AtomicBool, operation: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(format!("{operation} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for ControlledStore {
    fn name(&self) -> &'static str {
        "controlled"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    /// Value and TTL are read together, like a pipelined `GET` + `PTTL`,
    /// before the read parks.
    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(Vec<u8>, KeyTtl)>> {
        let fetched = self.inner.get_with_ttl(key).await;
        if self.hold_next_read.swap(false, Ordering::SeqCst) {
            self.read_parked.notify_one();
            self.resume_read.notified().await;
        }
        fetched
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        if !key.starts_with("__tiercache:") {
            self.injected(&self.fail_del, "del")?;
        }
        self.inner.del(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.inner.ttl(key).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.injected(&self.fail_srem, "srem")?;
        self.inner.srem(key, members).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        self.inner.smembers(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        self.inner.publish(channel, message).await
    }
}

fn cache_with(config: CacheConfig) -> (Arc<ControlledStore>, Arc<TieredCache>) {
    let store = Arc::new(ControlledStore::default());
    let local = LocalStore::new(config.local_max_entries, config.local_default_ttl());
    let cache = TieredCache::new(&config, local, store.clone()).unwrap();
    (store, Arc::new(cache))
}

fn cache() -> (Arc<ControlledStore>, Arc<TieredCache>) {
    cache_with(CacheConfig {
        remote_operation_timeout_seconds: 5,
        ..CacheConfig::default()
    })
}

#[tokio::test]
async fn test_set_during_remote_read_is_not_overwritten_by_promotion() {
    let (store, cache) = cache();
    cache.set("k", json!("v1"), HOUR, &[]).await;
    cache.local().remove("k").await;

    store.hold_next_read();
    let reader = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get("k").await }
    });
    store.read_parked.notified().await;

    cache.set("k", json!("v2"), HOUR, &[]).await;
    store.resume_read.notify_one();

    // The racing read still answers with what it fetched.
    let raced = reader.await.unwrap();
    assert_eq!(raced.as_deref(), Some(&json!("v1")));

    let local = cache.local().get("k").await;
    assert_ne!(local.as_deref(), Some(&json!("v1")), "L1 older than L2");
    assert_eq!(cache.get("k").await.as_deref(), Some(&json!("v2")));
}

#[tokio::test]
async fn test_delete_during_remote_read_is_not_undone_by_promotion() {
    let (store, cache) = cache();
    cache.set("k", json!("v1"), HOUR, &[]).await;
    cache.local().remove("k").await;

    store.hold_next_read();
    let reader = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get("k").await }
    });
    store.read_parked.notified().await;

    cache.delete("k").await;
    assert!(!store.inner.contains_key("k"));
    store.resume_read.notify_one();
    reader.await.unwrap();

    assert!(cache.local().get("k").await.is_none());
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn test_pattern_invalidation_during_remote_read_is_not_undone() {
    let (store, cache) = cache();
    cache.set("session:1", json!("s"), HOUR, &[]).await;
    cache.local().remove("session:1").await;

    store.hold_next_read();
    let reader = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get("session:1").await }
    });
    store.read_parked.notified().await;

    assert_eq!(cache.invalidate_by_pattern("session:*").await, 1);
    store.resume_read.notify_one();
    reader.await.unwrap();

    assert!(cache.local().get("session:1").await.is_none());
}

#[tokio::test]
async fn test_uncontended_read_still_promotes() {
    let (_, cache) = cache();
    cache.set("k", json!("v1"), HOUR, &[]).await;
    cache.local().remove("k").await;

    assert_eq!(cache.get("k").await.as_deref(), Some(&json!("v1")));
    assert_eq!(cache.local().get("k").await.as_deref(), Some(&json!("v1")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_never_leave_l1_behind_the_last_write() {
    let (_, cache) = cache();
    cache.set("counter", json!(0), HOUR, &[]).await;

    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                cache.local().remove("counter").await;
                cache.get("counter").await;
            }
        }));
    }

    for version in 1..=200 {
        cache.set("counter", json!(version), HOUR, &[]).await;
    }
    for reader in readers {
        reader.await.unwrap();
    }

    if let Some(local) = cache.local().get("counter").await {
        assert_eq!(local.as_ref(), &json!(200));
    }
    assert_eq!(cache.get("counter").await.as_deref(), Some(&json!(200)));
}

#[tokio::test]
async fn test_tag_invalidation_counts_only_remote_deletes() {
    let (store, cache) = cache();
    let tags = vec!["user:42".to_string()];
    cache.set("a", json!(1), HOUR, &tags).await;
    cache.set("b", json!(2), HOUR, &tags).await;

    store.fail_del.store(true, Ordering::SeqCst);
    assert_eq!(cache.invalidate_by_tags(&tags).await, 0);
    // L1 is cleared regardless.
    assert!(cache.local().get("a").await.is_none());
    assert!(store.inner.contains_key("a"));

    store.fail_del.store(false, Ordering::SeqCst);
    assert_eq!(cache.invalidate_by_tags(&tags).await, 2);
    assert!(!store.inner.contains_key("a"));
    assert!(!store.inner.contains_key("b"));
}

#[tokio::test]
async fn test_delete_publishes_even_when_index_cleanup_fails() {
    let (store, cache) = cache_with(CacheConfig {
        remote_operation_timeout_seconds: 5,
        invalidation_channel: Some("tiercache:invalidate".to_string()),
        ..CacheConfig::default()
    });
    cache
        .set("a", json!(1), HOUR, &["user:42".to_string()])
        .await;

    store.fail_srem.store(true, Ordering::SeqCst);
    cache.delete("a").await;
    assert!(!store.inner.contains_key("a"));

    let published = store.inner.published();
    assert_eq!(published.len(), 1);
    let message: InvalidationMessage = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(
        message.scope,
        InvalidationScope::Key {
            key: "a".to_string()
        }
    );
}
