//! Round-robin upstream pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::upstream::Upstream;

/// Error building a pool from configuration.
#[derive(Debug, thiserror::Error)]
#[error("upstream pool must contain at least one upstream")]
pub struct EmptyPool;

/// Immutable ordered list of upstreams with an atomic rotation cursor.
///
/// `get_next` hands out upstreams strictly in list order, wrapping around:
/// for any interleaving of K calls against N upstreams, each is picked
/// either floor(K/N) or ceil(K/N) times. The cursor is a single
/// fetch-and-increment, so concurrent callers never observe a skipped or
/// repeated slot.
#[derive(Debug)]
pub struct UpstreamPool {
    upstreams: Vec<Upstream>,
    cursor: AtomicUsize,
}

impl UpstreamPool {
    /// Build a pool. Fails when the list is empty.
    pub fn new(upstreams: Vec<Upstream>) -> Result<Self, EmptyPool> {
        if upstreams.is_empty() {
            return Err(EmptyPool);
        }
        Ok(Self {
            upstreams,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Next upstream in rotation. Wraps on `usize` overflow, which keeps
    /// the rotation intact because the index is reduced modulo the pool
    /// size.
    pub fn get_next(&self) -> &Upstream {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.upstreams[idx % self.upstreams.len()]
    }

    /// All upstreams, in configuration order.
    pub fn all(&self) -> &[Upstream] {
        &self.upstreams
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
