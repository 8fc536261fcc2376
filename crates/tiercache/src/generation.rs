//! Write generations guarding L2 to L1 promotion.
//!
//! A read that misses L1 goes to the backing store, and a write for the same
//! key can land while that read is in flight. Promoting the fetched value
//! afterwards would leave L1 older than the last write. Writers hold a
//! [`WriteTicket`] for their whole L1 + L2 sequence; readers take a
//! [`ReadTicket`] before the remote read and promote only while it is still
//! current.
//!
//! Keys are hashed onto a fixed set of stripes so memory stays bounded. Two
//! keys sharing a stripe only cost a skipped promotion, never a stale one.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_STRIPES: usize = 1024;

#[derive(Default)]
struct Stripe {
    generation: AtomicU64,
    writers: AtomicU64,
}

pub(crate) struct WriteGenerations {
    stripes: Box<[Stripe]>,
}

/// Snapshot taken before a remote read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadTicket {
    stripe: usize,
    generation: u64,
}

/// Held by a writer from its first L1 change until its remote call returns.
/// Dropping it (including on cancellation) completes the write.
pub(crate) struct WriteTicket<'a> {
    stripe: &'a Stripe,
}

impl WriteGenerations {
    pub(crate) fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    pub(crate) fn with_stripes(count: usize) -> Self {
        let stripes = (0..count.max(1)).map(|_| Stripe::default()).collect();
        Self { stripes }
    }

    fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub(crate) fn begin_read(&self, key: &str) -> ReadTicket {
        let stripe = self.stripe_of(key);
        ReadTicket {
            stripe,
            generation: self.stripes[stripe].generation.load(Ordering::SeqCst),
        }
    }

    /// True while no write to the ticket's stripe has started or finished
    /// since the ticket was taken.
    pub(crate) fn is_current(&self, ticket: &ReadTicket) -> bool {
        let stripe = &self.stripes[ticket.stripe];
        stripe.writers.load(Ordering::SeqCst) == 0
            && stripe.generation.load(Ordering::SeqCst) == ticket.generation
    }

    pub(crate) fn begin_write(&self, key: &str) -> WriteTicket<'_> {
        let stripe = &self.stripes[self.stripe_of(key)];
        stripe.writers.fetch_add(1, Ordering::SeqCst);
        stripe.generation.fetch_add(1, Ordering::SeqCst);
        WriteTicket { stripe }
    }
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        self.stripe.generation.fetch_add(1, Ordering::SeqCst);
        self.stripe.writers.fetch_sub(1, Ordering::SeqCst);
    }
}
