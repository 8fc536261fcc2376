//! Circuit breaker guarding the backing store.
//!
//! ```text
//!            threshold consecutive failures
//!   Closed ───────────────────────────────────▶ Open
//!     ▲                                          │ recovery delay elapses
//!     │ probe ok                                 ▼
//!     └──────────────────────────────────── HalfOpen ── probe failed ──▶ Open (timer re-armed)
//! ```
//!
//! The breaker holds no connection of its own. When the recovery timer fires
//! it asks a [`RecoveryProbe`] whether the store is reachable again. Only the
//! probe talks to the store while the breaker is not `Closed`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BreakerState {
    /// Remote calls flow normally
    Closed = 0,
    /// Remote calls are skipped until the recovery probe succeeds
    Open = 1,
    /// The recovery probe is in flight
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(v: u8) -> Self {
        match v {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_delay: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_delay: Duration::from_secs(30),
        }
    }
}

/// Connectivity check run when the recovery timer fires.
#[async_trait]
pub trait RecoveryProbe: Send + Sync + 'static {
    /// Returns `true` if the guarded service is reachable.
    async fn probe(&self) -> bool;
}

struct Shared {
    state: AtomicU8,
    failure_count: AtomicU32,
    shut_down: AtomicBool,
    config: BreakerConfig,
    probe: Arc<dyn RecoveryProbe>,
}

impl Shared {
    fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: BreakerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Process-local circuit breaker with an owned recovery timer.
///
/// Counter and state are atomics, so `record_failure`/`record_success` may be
/// called concurrently from any number of tasks. The `Closed -> Open` trip is
/// a compare-and-swap: exactly one caller observes it and arms the timer.
pub struct CircuitBreaker {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, probe: Arc<dyn RecoveryProbe>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(BreakerState::Closed as u8),
                failure_count: AtomicU32::new(0),
                shut_down: AtomicBool::new(false),
                config,
                probe,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.shared.state()
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.shared.failure_count.load(Ordering::SeqCst)
    }

    /// `false` whenever the breaker is not `Closed` or has been shut down.
    pub fn is_call_permitted(&self) -> bool {
        !self.shared.shut_down.load(Ordering::SeqCst) && self.state() == BreakerState::Closed
    }

    pub fn record_success(&self) {
        self.shared.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let count = self.shared.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.shared.config.failure_threshold {
            return;
        }

        let tripped = self
            .shared
            .state
            .compare_exchange(
                BreakerState::Closed as u8,
                BreakerState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if tripped {
            tracing::warn!(
                failures = count,
                recovery_delay_secs = self.shared.config.recovery_delay.as_secs(),
                "circuit breaker opened, remote store calls suspended"
            );
            crate::metrics::record_breaker_transition(BreakerState::Open);
            self.arm_recovery();
        }
    }

    /// Cancels the recovery timer. The breaker denies every call afterwards.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    fn arm_recovery(&self) {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                tracing::error!("no tokio runtime, circuit breaker cannot schedule recovery");
                return;
            }
        };
        let handle = runtime.spawn(recovery_loop(Arc::clone(&self.shared)));
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }
}

async fn recovery_loop(shared: Arc<Shared>) {
    loop {
        tokio::time::sleep(shared.config.recovery_delay).await;
        if shared.shut_down.load(Ordering::SeqCst) {
            return;
        }

        shared.set_state(BreakerState::HalfOpen);
        if shared.probe.probe().await {
            shared.failure_count.store(0, Ordering::SeqCst);
            shared.set_state(BreakerState::Closed);
            tracing::info!("circuit breaker closed, remote store reachable again");
            crate::metrics::record_breaker_transition(BreakerState::Closed);
            return;
        }

        shared.set_state(BreakerState::Open);
        tracing::warn!(
            retry_in_secs = shared.config.recovery_delay.as_secs(),
            "recovery probe failed, circuit breaker stays open"
        );
        crate::metrics::record_breaker_transition(BreakerState::Open);
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("config", &self.shared.config)
            .finish()
    }
}
