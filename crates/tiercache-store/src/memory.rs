//! In-memory backing store.
//!
//! Behaves like a single Redis node for the commands the cache uses: string
//! keys with expiry, sets that disappear when emptied, and a cursor-based
//! `SCAN`. Faults can be injected to exercise degraded paths without a
//! network.
//!
//! # Scan cursors
//!
//! Keys are visited in the order of a stable 64-bit hash of their name and
//! the cursor is "the smallest hash not yet visited". A key that exists for
//! the whole scan is therefore returned at least once, no matter how many
//! other keys are added or removed between rounds.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::pattern::GlobPattern;
use crate::traits::{BackingStore, KeyTtl, SCAN_START, ScanPage};
use crate::{StoreError, StoreResult};

/// Failure behaviour injected into every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FaultMode {
    /// Commands succeed.
    #[default]
    Healthy = 0,
    /// Commands fail immediately with [`StoreError::Unavailable`].
    Unavailable = 1,
    /// Commands never complete.
    Hang = 2,
}

impl From<u8> for FaultMode {
    fn from(v: u8) -> Self {
        match v {
            0 => FaultMode::Healthy,
            1 => FaultMode::Unavailable,
            _ => FaultMode::Hang,
        }
    }
}

#[derive(Debug, Clone)]
struct StringEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A process-local [`BackingStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: DashMap<String, StringEntry>,
    sets: DashMap<String, HashSet<String>>,
    fault: AtomicU8,
    calls: AtomicU64,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    /// Creates an empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes how subsequent commands behave.
    pub fn set_fault(&self, mode: FaultMode) {
        self.fault.store(mode as u8, Ordering::SeqCst);
    }

    /// The current fault mode.
    pub fn fault(&self) -> FaultMode {
        FaultMode::from(self.fault.load(Ordering::SeqCst))
    }

    /// Number of commands issued so far, including failed ones.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages published so far as `(channel, message)` pairs.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Returns `true` if a live string or set key exists.
    ///
    /// Inspection helper: ignores faults and is not counted as a command.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.strings
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
            || self.sets.contains_key(key)
    }

    /// Raw members of a set. Inspection helper, like [`contains_key`](Self::contains_key).
    pub fn members(&self, key: &str) -> HashSet<String> {
        self.sets.get(key).map(|s| s.clone()).unwrap_or_default()
    }

    /// All live keys, sorted. Inspection helper.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.live_keys();
        keys.sort();
        keys
    }

    async fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fault() {
            FaultMode::Healthy => Ok(()),
            FaultMode::Unavailable => Err(StoreError::unavailable("connection refused")),
            FaultMode::Hang => std::future::pending().await,
        }
    }

    fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.extend(self.sets.iter().map(|entry| entry.key().clone()));
        keys
    }

    fn remove_set_if_empty(&self, key: &str) {
        self.sets.remove_if(key, |_, members| members.is_empty());
    }
}

fn slot(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter().await?;
        let now = Instant::now();
        let expired = match self.strings.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.strings.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.enter().await?;
        self.sets.remove(key);
        self.strings.insert(
            key.to_string(),
            StringEntry {
                data: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.enter().await?;
        let now = Instant::now();
        let string_removed = self
            .strings
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now));
        let set_removed = self.sets.remove(key).is_some();
        Ok(string_removed || set_removed)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.enter().await?;
        let now = Instant::now();
        if let Some(entry) = self.strings.get(key) {
            return Ok(match entry.expires_at {
                Some(at) if at <= now => KeyTtl::Missing,
                Some(at) => KeyTtl::Expires(at - now),
                None => KeyTtl::Persistent,
            });
        }
        if self.sets.contains_key(key) {
            return Ok(KeyTtl::Persistent);
        }
        Ok(KeyTtl::Missing)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.enter().await?;
        if members.is_empty() {
            return Ok(());
        }
        self.sets
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.enter().await?;
        if let Some(mut set) = self.sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        self.remove_set_if_empty(key);
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        self.enter().await?;
        Ok(self.members(key))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.enter().await?;
        let glob = GlobPattern::new(pattern);

        let mut remaining: Vec<(u64, String)> = self
            .live_keys()
            .into_iter()
            .map(|key| (slot(&key), key))
            .filter(|(slot, _)| *slot >= cursor)
            .collect();
        remaining.sort_unstable();

        let mut take = count.max(1).min(remaining.len());
        // Never split keys that share a slot across two rounds.
        while take > 0 && take < remaining.len() && remaining[take].0 == remaining[take - 1].0 {
            take += 1;
        }

        let next_cursor = if take >= remaining.len() {
            SCAN_START
        } else {
            remaining[take - 1].0.checked_add(1).unwrap_or(SCAN_START)
        };

        let keys = remaining
            .into_iter()
            .take(take)
            .map(|(_, key)| key)
            .filter(|key| glob.matches(key))
            .collect();

        Ok(ScanPage { next_cursor, keys })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter().await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        self.enter().await?;
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}
