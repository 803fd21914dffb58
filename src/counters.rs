//! Per-callable call counters for the frequency gate.
//!
//! Only consulted when `frequency > 1`. A counter is created lazily on the
//! first matched in-window call for an identity and incremented atomically
//! on every subsequent one, so "every Nth call" stays exact even when the
//! host runs callbacks genuinely in parallel. The atomic increment is
//! uncontended in the common case; the shard lock is only held long enough
//! to find (or insert) the `Arc` holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam::utils::CachePadded;

use crate::cache::CallableId;

const SHARD_COUNT: usize = 64;

/// Concurrent map from [`CallableId`] to an atomic matched-call count.
pub struct CallCounters {
    shards: Box<[CachePadded<RwLock<HashMap<CallableId, Arc<AtomicU64>>>>]>,
}

impl CallCounters {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| CachePadded::new(RwLock::new(HashMap::new())))
            .collect();
        CallCounters { shards }
    }

    #[inline]
    fn shard(&self, id: CallableId) -> &RwLock<HashMap<CallableId, Arc<AtomicU64>>> {
        let idx = (id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58) as usize;
        &self.shards[idx % SHARD_COUNT]
    }

    /// Atomically increment the counter for `id` and return the
    /// post-increment value. The first call for an identity returns 1.
    pub fn increment(&self, id: CallableId) -> u64 {
        // Fast path: counter already exists, read lock only.
        {
            let shard = self.shard(id).read().unwrap_or_else(|e| e.into_inner());
            if let Some(counter) = shard.get(&id) {
                return counter.fetch_add(1, Ordering::Relaxed) + 1;
            }
        }

        // Slow path: insert under the write lock. Another thread may have
        // inserted between the locks; entry() keeps exactly one counter.
        let counter = {
            let mut shard = self.shard(id).write().unwrap_or_else(|e| e.into_inner());
            Arc::clone(shard.entry(id).or_insert_with(|| Arc::new(AtomicU64::new(0))))
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current count for `id` without incrementing; 0 if never counted.
    pub fn get(&self, id: CallableId) -> u64 {
        let shard = self.shard(id).read().unwrap_or_else(|e| e.into_inner());
        shard
            .get(&id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Drop all counters; the next increment for any identity returns 1.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

impl Default for CallCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_increment_returns_one() {
        let counters = CallCounters::new();
        assert_eq!(counters.get(CallableId(1)), 0);
        assert_eq!(counters.increment(CallableId(1)), 1);
        assert_eq!(counters.increment(CallableId(1)), 2);
        assert_eq!(counters.increment(CallableId(1)), 3);
        assert_eq!(counters.get(CallableId(1)), 3);
    }

    #[test]
    fn test_counters_are_independent() {
        let counters = CallCounters::new();
        counters.increment(CallableId(1));
        counters.increment(CallableId(1));
        assert_eq!(counters.increment(CallableId(2)), 1);
        assert_eq!(counters.get(CallableId(1)), 2);
    }

    #[test]
    fn test_clear_resets() {
        let counters = CallCounters::new();
        counters.increment(CallableId(1));
        counters.clear();
        assert_eq!(counters.get(CallableId(1)), 0);
        assert_eq!(counters.increment(CallableId(1)), 1);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        // 8 threads × 10_000 increments must total exactly 80_000 and every
        // post-increment value must be seen exactly once.
        let counters = std::sync::Arc::new(CallCounters::new());
        let id = CallableId(42);

        std::thread::scope(|s| {
            for _ in 0..8 {
                let counters = std::sync::Arc::clone(&counters);
                s.spawn(move || {
                    for _ in 0..10_000 {
                        let v = counters.increment(id);
                        assert!(v >= 1);
                    }
                });
            }
        });

        assert_eq!(counters.get(id), 80_000);
    }
}
