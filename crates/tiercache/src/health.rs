use serde::Serialize;

use crate::breaker::BreakerState;

/// Point-in-time view of cache health.
///
/// Produced by [`TieredCache::health`](crate::TieredCache::health); never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// The local tier is in-process and always available.
    pub local_available: bool,
    /// `true` while the breaker lets remote calls through.
    pub remote_healthy: bool,
    /// Outcome of the most recent remote round trip.
    pub remote_connected: bool,
    pub breaker_state: BreakerState,
    pub consecutive_failures: u32,
    pub local_entries: u64,
}

impl HealthSnapshot {
    /// Serving from the local tier only.
    pub fn is_degraded(&self) -> bool {
        !self.remote_healthy
    }
}
