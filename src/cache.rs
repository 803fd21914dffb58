//! Per-callable match-decision cache.
//!
//! Testing a callable against the target patterns is pure and deterministic
//! under a fixed configuration, but not free. The cache remembers the
//! decision per callable identity so the fast path (a callable already
//! known not to match) costs one shard read.
//!
//! # Concurrency
//!
//! Entries live in fixed shards, each a `RwLock<HashMap>` padded to its own
//! cache line. The shard lock makes every read see a fully-written entry —
//! never a torn one — and that is the *only* serialization this structure
//! needs: the matcher is deliberately not called under any lock, so several
//! threads missing on the same identity may compute the decision
//! redundantly and race to `store` it. Last write wins, and that is safe,
//! because every writer computes the same value. Accepting duplicate work
//! during warm-up buys a lock-free-in-spirit hot path.

use std::collections::HashMap;
use std::sync::RwLock;

use crossbeam::utils::CachePadded;

/// Stable identity for one callable (function/method definition), unique
/// for the life of the process. Hosts typically use the callable's address
/// or a monotonically issued id; freno only requires stability and
/// uniqueness per definition, not per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(pub u64);

/// Cached match decision for one callable.
///
/// Transitions only `Unknown → {Match, NoMatch}`; an entry never reverts
/// except through [`MatchCache::clear`], which resets everything to
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntry {
    /// Not yet decided; the matcher must be consulted.
    Unknown,
    /// Decided: the callable does not match any target.
    NoMatch,
    /// Decided: the callable matches at least one target.
    Match,
}

const SHARD_COUNT: usize = 64;

/// Concurrent map from [`CallableId`] to [`CacheEntry`].
pub struct MatchCache {
    shards: Box<[CachePadded<RwLock<HashMap<CallableId, CacheEntry>>>]>,
}

impl MatchCache {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| CachePadded::new(RwLock::new(HashMap::new())))
            .collect();
        MatchCache { shards }
    }

    #[inline]
    fn shard(&self, id: CallableId) -> &RwLock<HashMap<CallableId, CacheEntry>> {
        // Fibonacci hashing spreads both sequential ids and pointer-derived
        // ids across shards.
        let idx = (id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58) as usize;
        &self.shards[idx % SHARD_COUNT]
    }

    /// Look up the cached decision for `id`. Absent entries are `Unknown`.
    #[inline]
    pub fn lookup(&self, id: CallableId) -> CacheEntry {
        let shard = self.shard(id).read().unwrap_or_else(|e| e.into_inner());
        shard.get(&id).copied().unwrap_or(CacheEntry::Unknown)
    }

    /// Record the decision for `id`. Concurrent stores for the same
    /// identity are expected to carry the same value; the last one wins.
    pub fn store(&self, id: CallableId, is_match: bool) {
        let entry = if is_match {
            CacheEntry::Match
        } else {
            CacheEntry::NoMatch
        };
        let mut shard = self.shard(id).write().unwrap_or_else(|e| e.into_inner());
        shard.insert(id, entry);
    }

    /// Reset every entry to `Unknown`.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// Number of decided entries across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new()
    }
}
