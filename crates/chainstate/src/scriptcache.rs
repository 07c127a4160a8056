//! Script execution cache.
//!
//! Membership structure recording transactions already proven fully
//! valid under a specific flag set, so re-validating the same
//! transaction during block connection skips the interpreter entirely.
//! Only positive results are ever recorded: a transaction invalid under
//! one flag set may be valid under a weaker one, so negatives cannot be
//! cached safely across flag sets.
//!
//! Keys are keyed BLAKE2b digests of `txid || flags`, salted with a
//! per-process random secret. Transaction bytes are attacker supplied,
//! so unsalted keys would let an adversary grind for key collisions
//! against a weak hash; the salt makes key prediction infeasible
//! without the running process's secret.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use blake2b_simd::Params as Blake2bParams;
use rand::RngCore;
use veld_consensus::Hash256;
use veld_script::flags::ScriptFlags;

pub const DEFAULT_MAX_ENTRIES: usize = 1 << 16;

const SHARD_COUNT: usize = 64;

type CacheKey = [u8; 32];

pub struct ScriptExecutionCache {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
    salt: [u8; 32],
}

#[derive(Default)]
struct Shard {
    entries: HashSet<CacheKey>,
    order: VecDeque<CacheKey>,
}

impl ScriptExecutionCache {
    pub fn new(max_entries: usize) -> Self {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(max_entries, salt)
    }

    /// Deterministic construction for tests. Production callers use
    /// [`ScriptExecutionCache::new`] so keys stay unpredictable.
    pub fn with_salt(max_entries: usize, salt: [u8; 32]) -> Self {
        let shard_capacity = (max_entries / SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            shards,
            shard_capacity,
            salt,
        }
    }

    fn key(&self, txid: &Hash256, flags: ScriptFlags) -> CacheKey {
        let mut state = Blake2bParams::new()
            .hash_length(32)
            .key(&self.salt)
            .to_state();
        state.update(txid);
        state.update(&flags.to_le_bytes());
        let digest = state.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_bytes());
        out
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<Shard> {
        &self.shards[key[0] as usize % SHARD_COUNT]
    }

    /// True only if `insert` recorded this exact (txid, flags) pair.
    pub fn contains(&self, txid: &Hash256, flags: ScriptFlags) -> bool {
        let key = self.key(txid, flags);
        let shard = self.shard(&key).lock().expect("script cache lock");
        shard.entries.contains(&key)
    }

    /// Record full validity of `txid` under `flags`. Idempotent.
    pub fn insert(&self, txid: &Hash256, flags: ScriptFlags) {
        let key = self.key(txid, flags);
        let mut shard = self.shard(&key).lock().expect("script cache lock");
        if !shard.entries.insert(key) {
            return;
        }
        shard.order.push_back(key);
        while shard.order.len() > self.shard_capacity {
            if let Some(evicted) = shard.order.pop_front() {
                shard.entries.remove(&evicted);
            }
        }
    }

    /// Drop every entry, e.g. when a protocol upgrade changes the
    /// active flag set.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().expect("script cache lock");
            shard.entries.clear();
            shard.order.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("script cache lock").entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> Hash256 {
        [byte; 32]
    }

    #[test]
    fn insert_then_contains() {
        let cache = ScriptExecutionCache::with_salt(1024, [7u8; 32]);
        assert!(!cache.contains(&txid(1), 3));
        cache.insert(&txid(1), 3);
        assert!(cache.contains(&txid(1), 3));
        // Exact-match lookup only: a different flag set misses.
        assert!(!cache.contains(&txid(1), 2));
        assert!(!cache.contains(&txid(2), 3));
    }

    #[test]
    fn insert_is_idempotent() {
        let cache = ScriptExecutionCache::with_salt(1024, [7u8; 32]);
        cache.insert(&txid(1), 0);
        cache.insert(&txid(1), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn salt_separates_instances() {
        let a = ScriptExecutionCache::with_salt(1024, [1u8; 32]);
        let b = ScriptExecutionCache::with_salt(1024, [2u8; 32]);
        assert_ne!(a.key(&txid(9), 5), b.key(&txid(9), 5));
    }

    #[test]
    fn capacity_bounds_occupancy() {
        let cache = ScriptExecutionCache::with_salt(SHARD_COUNT, [7u8; 32]);
        for i in 0..10_000u32 {
            let mut id = [0u8; 32];
            id[..4].copy_from_slice(&i.to_le_bytes());
            cache.insert(&id, 0);
        }
        // One entry per shard at most.
        assert!(cache.len() <= SHARD_COUNT);
    }

    #[test]
    fn clear_empties_every_shard() {
        let cache = ScriptExecutionCache::with_salt(1024, [7u8; 32]);
        for byte in 0..100u8 {
            cache.insert(&txid(byte), 0);
        }
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&txid(5), 0));
    }
}
