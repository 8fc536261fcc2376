//! The backing store contract consumed by the cache coordinator.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::StoreResult;

/// Cursor value that starts a scan and signals its completion.
pub const SCAN_START: u64 = 0;

/// Remaining lifetime of a key, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and has no expiry.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Interprets a Redis `PTTL` reply (`-2` missing, `-1` no expiry).
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Missing,
            m if m < 0 => KeyTtl::Persistent,
            m => KeyTtl::Expires(Duration::from_millis(m as u64)),
        }
    }
}

/// One round of an incremental key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next round; [`SCAN_START`] once the scan is done.
    pub next_cursor: u64,
    /// Keys matched in this round. May repeat keys from earlier rounds.
    pub keys: Vec<String>,
}

impl ScanPage {
    /// Returns `true` if the cursor came back to the start sentinel.
    pub fn is_complete(&self) -> bool {
        self.next_cursor == SCAN_START
    }
}

/// A shared key-value service sitting behind the local cache tier.
///
/// Implementations report failures as [`StoreError`](crate::StoreError) and
/// never panic. Callers bound each call with their own timeout; a store may
/// also enforce one internally.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// `GET key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// `GET key` plus its remaining lifetime.
    ///
    /// The default issues two commands; backends that can pipeline should
    /// override it.
    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(Vec<u8>, KeyTtl)>> {
        match self.get(key).await? {
            Some(data) => {
                let ttl = self.ttl(key).await?;
                Ok(Some((data, ttl)))
            }
            None => Ok(None),
        }
    }

    /// `SET key value` with an expiry.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// `DEL key`. Returns `true` if something was removed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// `PTTL key`.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// `SADD key member...`.
    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// `SREM key member...`.
    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// `SMEMBERS key`. Unknown keys yield an empty set.
    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>>;

    /// `SCAN cursor MATCH pattern COUNT count`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;

    /// Connectivity check used by recovery probes.
    async fn ping(&self) -> StoreResult<()>;

    /// `PUBLISH channel message`. Backends without pub/sub ignore it.
    async fn publish(&self, _channel: &str, _message: &str) -> StoreResult<()> {
        Ok(())
    }

    /// Releases connections held by the backend.
    async fn close(&self) {}
}
