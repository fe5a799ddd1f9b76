//! Monotonic id allocation

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out increasing ids, starting at 1
///
/// Owned by whoever needs correlation ids (request ids in a renderer, port
/// and context ids in the host) instead of living in a global.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
