//! # tiercache
//!
//! Two-tier cache: a bounded in-process store (L1) in front of a shared
//! backing store (L2, Redis in production).
//!
//! - Reads hit L1 first and fall back to L2, promoting hits.
//! - Writes go to L1 synchronously and write through to L2.
//! - Keys can carry tags for bulk invalidation; glob patterns are supported
//!   through incremental `SCAN`.
//! - Payloads above a size threshold are zlib-compressed.
//! - A circuit breaker stops remote calls after repeated failures and probes
//!   for recovery on a timer; meanwhile the cache serves from L1 only.
//!
//! Remote failures never surface to callers. A miss during an outage sends
//! the caller down its normal "load from source of truth" path.
//!
//! ```ignore
//! let config = tiercache::loader::load_config(None)?;
//! let cache = tiercache::TieredCache::connect(&config).await?;
//!
//! cache
//!     .set("cart:42", json!({"items": [1, 2]}), Duration::from_secs(3600), &tags)
//!     .await;
//! cache.invalidate_by_tags(&["user:42".to_string()]).await;
//! assert!(cache.get("cart:42").await.is_none());
//! ```

pub mod breaker;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
mod generation;
pub mod health;
pub mod local;
pub mod metrics;
pub mod observability;
pub mod pubsub;
pub mod redis_store;
pub mod tags;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, RecoveryProbe};
pub use codec::{Encoding, ValueCodec};
pub use crate::config::{CacheConfig, loader};
pub use coordinator::TieredCache;
pub use error::{CacheError, CacheResult, CodecError};
pub use health::HealthSnapshot;
pub use local::LocalStore;
pub use observability::{init_tracing, init_tracing_with_level};
pub use pubsub::{InvalidationListener, InvalidationMessage, InvalidationScope};
pub use redis_store::RedisStore;
pub use tags::TagIndex;

pub use tiercache_store::{BackingStore, DynBackingStore, FaultMode, MemoryStore, StoreError};
