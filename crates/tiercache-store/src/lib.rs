//! # tiercache-store
//!
//! Backing store abstraction for the tiercache coordinator.
//!
//! The coordinator never talks to a network client directly; it talks to a
//! [`BackingStore`], a small typed contract modelled on the Redis commands it
//! needs (`GET`, `SET` with expiry, `DEL`, `PTTL`, `SADD`, `SREM`, `SMEMBERS`,
//! `SCAN`, `PING`, `PUBLISH`).
//!
//! This crate also ships [`MemoryStore`], a process-local backend with fault
//! injection used by tests and single-node deployments. The Redis backend
//! lives in the `tiercache` crate next to its connection pool configuration.
//!
//! ## Example
//!
//! ```ignore
//! use tiercache_store::{BackingStore, MemoryStore, SCAN_START};
//!
//! let store = MemoryStore::new();
//! store.set_ex("session:1", b"{}", Duration::from_secs(60)).await?;
//! let page = store.scan(SCAN_START, "session:*", 100).await?;
//! ```

mod error;
pub mod memory;
mod pattern;
mod traits;

pub use error::StoreError;
pub use memory::{FaultMode, MemoryStore};
pub use pattern::GlobPattern;
pub use traits::{BackingStore, KeyTtl, SCAN_START, ScanPage};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shareable backing store.
pub type DynBackingStore = std::sync::Arc<dyn BackingStore>;
