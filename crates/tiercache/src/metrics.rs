//! Cache metrics.
//!
//! Emitted through the `metrics` facade; the embedding application decides
//! which recorder (Prometheus, statsd, none) receives them.

use metrics::{counter, gauge};

use crate::breaker::BreakerState;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "tiercache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "tiercache_misses_total";
    pub const CACHE_LOCAL_ENTRIES: &str = "tiercache_local_entries";
    pub const COMPRESSED_WRITES_TOTAL: &str = "tiercache_compressed_writes_total";
    pub const REMOTE_ERRORS_TOTAL: &str = "tiercache_remote_errors_total";
    pub const BREAKER_TRANSITIONS_TOTAL: &str = "tiercache_breaker_transitions_total";
    pub const KEYS_INVALIDATED_TOTAL: &str = "tiercache_keys_invalidated_total";
}

/// Record a cache hit on the given tier ("L1" or "L2").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_compressed_write() {
    counter!(names::COMPRESSED_WRITES_TOTAL).increment(1);
}

/// Record a swallowed remote-side error.
pub fn record_remote_error(operation: &'static str, kind: &'static str) {
    counter!(
        names::REMOTE_ERRORS_TOTAL,
        "operation" => operation,
        "kind" => kind
    )
    .increment(1);
}

pub fn record_breaker_transition(to: BreakerState) {
    counter!(names::BREAKER_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
}

/// Record keys removed by a bulk invalidation ("tag" or "pattern").
pub fn record_invalidated(reason: &'static str, count: u64) {
    counter!(names::KEYS_INVALIDATED_TOTAL, "reason" => reason).increment(count);
}

pub fn set_local_entries(count: u64) {
    gauge!(names::CACHE_LOCAL_ENTRIES).set(count as f64);
}
