//! Cache coordinator: the public get/set/delete/invalidate surface.
//!
//! ## Lookup Order
//!
//! 1. L1 (local store). A hit returns immediately, without touching the
//!    breaker or the backing store.
//! 2. L2 (backing store), only while the breaker permits calls. A hit is
//!    decoded and promoted to L1 for the entry's remaining TTL.
//!
//! A promotion is skipped when a write to the same key started or finished
//! while the remote read was in flight, so L1 never ends up older than the
//! last write made through this instance.
//!
//! ## Failure handling
//!
//! Every remote call is bounded by `remote_operation_timeout_seconds`. Errors
//! and timeouts are logged, counted against the breaker and turned into a miss
//! (reads) or a skipped write-through (writes). Callers observe degradation
//! only through [`TieredCache::health`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tiercache_store::{DynBackingStore, GlobPattern, KeyTtl, SCAN_START, StoreError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::breaker::{BreakerState, CircuitBreaker, RecoveryProbe};
use crate::codec::{Encoding, ValueCodec};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::generation::{ReadTicket, WriteGenerations};
use crate::health::HealthSnapshot;
use crate::local::LocalStore;
use crate::metrics;
use crate::pubsub::{InvalidationListener, InvalidationMessage};
use crate::redis_store::RedisStore;
use crate::tags::TagIndex;

/// Recovery probe: one bounded `PING` against the backing store.
struct PingProbe {
    store: DynBackingStore,
    timeout: Duration,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl RecoveryProbe for PingProbe {
    async fn probe(&self) -> bool {
        let ok = matches!(
            tokio::time::timeout(self.timeout, self.store.ping()).await,
            Ok(Ok(()))
        );
        self.connected.store(ok, Ordering::SeqCst);
        ok
    }
}

/// Two-tier cache: local store (L1) in front of a backing store (L2).
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct TieredCache {
    local: LocalStore,
    store: DynBackingStore,
    tags: TagIndex,
    codec: ValueCodec,
    breaker: CircuitBreaker,
    generations: WriteGenerations,
    remote_connected: Arc<AtomicBool>,
    remote_timeout: Duration,
    scan_batch_size: usize,
    scan_max_rounds: u32,
    instance_id: Uuid,
    invalidation_channel: Option<String>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TieredCache {
    /// Assembles a cache from its collaborators.
    ///
    /// `InvalidConfiguration` is the only error; nothing is sent to the
    /// backing store here.
    pub fn new(config: &CacheConfig, local: LocalStore, store: DynBackingStore) -> CacheResult<Self> {
        config.validate()?;

        let remote_timeout = config.remote_operation_timeout();
        let remote_connected = Arc::new(AtomicBool::new(false));
        let probe = Arc::new(PingProbe {
            store: Arc::clone(&store),
            timeout: remote_timeout,
            connected: Arc::clone(&remote_connected),
        });

        Ok(Self {
            tags: TagIndex::new(Arc::clone(&store), config.index_prefix.clone()),
            codec: ValueCodec::new(config.compression_threshold_bytes),
            breaker: CircuitBreaker::new(config.breaker(), probe),
            generations: WriteGenerations::new(),
            local,
            store,
            remote_connected,
            remote_timeout,
            scan_batch_size: config.scan_batch_size,
            scan_max_rounds: config.scan_max_rounds,
            instance_id: Uuid::new_v4(),
            invalidation_channel: config.invalidation_channel.clone(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Builds a Redis-backed cache from configuration.
    ///
    /// An unreachable Redis is not fatal: the initial `PING` failure is
    /// counted like any other and the cache serves from L1 until the breaker
    /// recovers.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let store = RedisStore::from_config(config)?;
        let local = LocalStore::new(config.local_max_entries, config.local_default_ttl());
        let cache = Self::new(config, local, Arc::new(store))?;

        if cache.ping().await {
            tracing::info!(endpoint = %config.remote_endpoint, "tiered cache connected");
        } else {
            tracing::warn!(
                endpoint = %config.remote_endpoint,
                "backing store unreachable at startup, serving from local tier"
            );
        }

        if let Some(channel) = &config.invalidation_channel {
            let listener = InvalidationListener::new(
                config.remote_endpoint.clone(),
                channel.clone(),
                cache.instance_id,
                cache.local.clone(),
            );
            *cache.listener.lock() = Some(listener.start());
        }

        Ok(cache)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Identifies this instance in published invalidation messages.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Looks a key up in L1, then L2.
    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        if let Some(value) = self.local.get(key).await {
            tracing::debug!(key = %key, tier = "L1", "cache hit");
            metrics::record_cache_hit("L1");
            return Some(value);
        }

        let ticket = self.generations.begin_read(key);
        if !self.breaker.is_call_permitted() {
            tracing::debug!(key = %key, breaker = %self.breaker.state(), "cache miss, remote skipped");
            metrics::record_cache_miss();
            return None;
        }

        let Some((bytes, ttl)) = self
            .remote("get", key, self.store.get_with_ttl(key))
            .await
            .flatten()
        else {
            tracing::debug!(key = %key, "cache miss");
            metrics::record_cache_miss();
            return None;
        };

        let value = match self.codec.decode(&bytes) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                self.record_error("decode", key, &CacheError::from(e));
                metrics::record_cache_miss();
                return None;
            }
        };

        match ttl {
            KeyTtl::Expires(remaining) => self.promote(key, &value, remaining, &ticket).await,
            KeyTtl::Persistent => {
                self.promote(key, &value, self.local.default_ttl(), &ticket)
                    .await
            }
            // Expired between GET and PTTL; serve it once, don't promote.
            KeyTtl::Missing => {}
        }

        tracing::debug!(key = %key, tier = "L2", "cache hit");
        metrics::record_cache_hit("L2");
        Some(value)
    }

    /// Typed [`get`](Self::get). A stored value of the wrong shape is an error.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(value) = self.get(key).await else {
            return Ok(None);
        };
        let typed = T::deserialize(value.as_ref()).map_err(|e| CacheError::Codec(e.into()))?;
        Ok(Some(typed))
    }

    /// Writes L1, then writes through to L2 and the tag index when the
    /// breaker permits. A zero `ttl` means the local default.
    ///
    /// A write skipped while the breaker is open stays local-only; it is not
    /// replayed when the breaker closes.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) {
        let ttl = if ttl.is_zero() {
            self.local.default_ttl()
        } else {
            ttl
        };

        let _write = self.generations.begin_write(key);
        let value = Arc::new(value);
        self.local.insert(key, Arc::clone(&value), ttl).await;
        self.refresh_local_gauge();

        if !self.breaker.is_call_permitted() {
            tracing::debug!(key = %key, breaker = %self.breaker.state(), "write kept local-only");
            return;
        }

        let encoded = match self.codec.encode(&value) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode value, write kept local-only");
                return;
            }
        };
        if encoded.encoding == Encoding::Compressed {
            metrics::record_compressed_write();
        }

        if self
            .remote("set", key, self.store.set_ex(key, &encoded.bytes, ttl))
            .await
            .is_none()
        {
            return;
        }

        if !tags.is_empty() {
            self.remote("tag_attach", key, self.tags.attach(key, tags))
                .await;
        }
    }

    /// Typed [`set`](Self::set). Fails only if `value` cannot be serialized.
    pub async fn set_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[String],
    ) -> CacheResult<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Codec(e.into()))?;
        self.set(key, value, ttl, tags).await;
        Ok(())
    }

    /// Removes `key` from both tiers and the tag index. Idempotent.
    pub async fn delete(&self, key: &str) {
        self.remove_key(key).await;
    }

    /// Deletes every key carrying any of `tags`. Returns how many resolved
    /// keys the backing store accepted a delete for.
    ///
    /// Nothing happens while the breaker is open. A concurrent `set` that
    /// re-tags a key mid-invalidation may or may not survive.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
        let mut deleted = 0u64;
        for tag in tags {
            if !self.breaker.is_call_permitted() {
                break;
            }
            let Some(keys) = self.remote("tag_resolve", tag, self.tags.resolve(tag)).await else {
                continue;
            };
            tracing::debug!(tag = %tag, keys = keys.len(), "invalidating tag");
            for key in &keys {
                if self.remove_key(key).await.is_some() {
                    deleted += 1;
                }
            }
        }
        metrics::record_invalidated("tag", deleted);
        deleted
    }

    /// Deletes every key matching the glob `pattern` from both tiers.
    /// Returns how many remote keys were removed.
    ///
    /// L1 is purged by the same pattern unconditionally. The remote key-space
    /// is walked with a cursor in bounded batches; the walk ends when the
    /// cursor wraps, the breaker opens, or `scan_max_rounds` is reached.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> u64 {
        let purged = self.local.purge_matching(&GlobPattern::new(pattern)).await;
        tracing::debug!(pattern = %pattern, purged, "purged local tier");

        let mut deleted = 0u64;
        let mut cursor = SCAN_START;
        let mut rounds = 0u32;
        loop {
            if !self.breaker.is_call_permitted() {
                tracing::warn!(pattern = %pattern, rounds, "pattern invalidation stopped, breaker open");
                break;
            }
            if rounds >= self.scan_max_rounds {
                tracing::warn!(pattern = %pattern, rounds, "pattern invalidation hit round limit");
                break;
            }
            rounds += 1;

            let Some(page) = self
                .remote(
                    "scan",
                    pattern,
                    self.store.scan(cursor, pattern, self.scan_batch_size),
                )
                .await
            else {
                break;
            };

            for key in &page.keys {
                if self.tags.is_index_key(key) {
                    continue;
                }
                let _write = self.generations.begin_write(key);
                self.local.remove(key).await;
                if self.delete_remote(key).await == Some(true) {
                    deleted += 1;
                }
            }

            if page.is_complete() {
                break;
            }
            cursor = page.next_cursor;
        }

        self.refresh_local_gauge();
        if deleted > 0 {
            self.publish(InvalidationMessage::pattern(self.instance_id, pattern))
                .await;
        }
        tracing::info!(pattern = %pattern, deleted, rounds, "pattern invalidation finished");
        metrics::record_invalidated("pattern", deleted);
        deleted
    }

    /// Current view of cache health. Never touches the backing store.
    pub fn health(&self) -> HealthSnapshot {
        let local_entries = self.local.entry_count();
        HealthSnapshot {
            local_available: true,
            remote_healthy: self.breaker.is_call_permitted(),
            remote_connected: self.remote_connected.load(Ordering::SeqCst),
            breaker_state: self.breaker.state(),
            consecutive_failures: self.breaker.failure_count(),
            local_entries,
        }
    }

    /// Stops the recovery timer and the invalidation listener, then releases
    /// the backing store. Later calls are served from L1 only.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.breaker.shutdown();
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.store.close().await;
        self.remote_connected.store(false, Ordering::SeqCst);
        tracing::info!(store = self.store.name(), "tiered cache closed");
    }

    async fn ping(&self) -> bool {
        self.remote("ping", "", self.store.ping()).await.is_some()
    }

    /// Copies an L2 hit into L1 unless a write to `key` raced the read.
    async fn promote(&self, key: &str, value: &Arc<Value>, ttl: Duration, ticket: &ReadTicket) {
        if !self.generations.is_current(ticket) {
            tracing::debug!(key = %key, "write raced remote read, not promoting");
            return;
        }
        self.local.insert(key, Arc::clone(value), ttl).await;
        // A writer may have slipped in between the check and the insert.
        if !self.generations.is_current(ticket) {
            tracing::debug!(key = %key, "write raced promotion, dropping local copy");
            self.local.remove(key).await;
        }
        self.refresh_local_gauge();
    }

    /// Shared by `delete` and tag invalidation. `None` when the remote delete
    /// did not run or failed, otherwise whether a value existed.
    async fn remove_key(&self, key: &str) -> Option<bool> {
        let _write = self.generations.begin_write(key);
        self.local.remove(key).await;
        self.refresh_local_gauge();

        if !self.breaker.is_call_permitted() {
            return None;
        }
        let existed = self.delete_remote(key).await?;
        self.publish(InvalidationMessage::key(self.instance_id, key))
            .await;
        Some(existed)
    }

    /// Removes the remote value and its index entries. `None` if the `DEL`
    /// failed, otherwise whether a value existed. A failed index cleanup is
    /// counted against the breaker but does not undo the delete.
    async fn delete_remote(&self, key: &str) -> Option<bool> {
        let existed = self.remote("del", key, self.store.del(key)).await?;
        self.remote("tag_detach", key, self.tags.detach(key))
            .await;
        Some(existed)
    }

    fn refresh_local_gauge(&self) {
        metrics::set_local_entries(self.local.entry_count());
    }

    async fn publish(&self, message: InvalidationMessage) {
        let Some(channel) = &self.invalidation_channel else {
            return;
        };
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize invalidation message");
                return;
            }
        };
        self.remote("publish", channel, self.store.publish(channel, &payload))
            .await;
    }

    /// Runs one remote operation under the timeout and feeds the outcome to
    /// the breaker.
    async fn remote<T, F>(&self, operation: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.remote_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(StoreError::timeout(operation, self.remote_timeout)),
        };
        match result {
            Ok(v) => {
                self.remote_connected.store(true, Ordering::SeqCst);
                self.breaker.record_success();
                Some(v)
            }
            Err(e) => {
                self.remote_connected.store(false, Ordering::SeqCst);
                self.record_error(operation, key, &CacheError::from(e));
                None
            }
        }
    }

    fn record_error(&self, operation: &'static str, key: &str, error: &CacheError) {
        tracing::warn!(
            operation,
            key = %key,
            error = %error,
            breaker = %self.breaker.state(),
            "remote cache operation failed"
        );
        metrics::record_remote_error(operation, error.kind());
        self.breaker.record_failure();
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("instance_id", &self.instance_id)
            .field("store", &self.store.name())
            .field("local", &self.local)
            .field("breaker", &self.breaker)
            .finish()
    }
}
