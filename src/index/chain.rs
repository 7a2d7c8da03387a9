//! Intrusive hash chains over record ids.
//!
//! ```text
//! last[bucket] ──► 9 ──► 4 ──► 1 ──► NONE      prev[9] = 4, prev[4] = 1, ...
//! ```
//!
//! `prev` has one slot per indexed record, so linking record `id` is a push.
//! Nodes are slot ids, never pointers, and walking a chain visits records
//! newest first. A bucket mixes every key that hashes to it; callers compare
//! the record bytes at each node.

use xxhash_rust::xxh3::xxh3_64;

use crate::config::{MAX_CHAIN_LOAD, MIN_HASH_BUCKETS, NONE_ID};

#[derive(Debug, Clone)]
pub struct ChainIndex {
    last: Vec<u32>,
    prev: Vec<u32>,
    mask: u64,
}

impl ChainIndex {
    pub fn with_capacity(records: usize) -> Self {
        let buckets = buckets_for(records);
        Self {
            last: vec![NONE_ID; buckets],
            prev: Vec::with_capacity(records),
            mask: buckets as u64 - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.prev.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prev.is_empty()
    }

    pub fn buckets(&self) -> usize {
        self.last.len()
    }

    /// Links the next record id. Ids must arrive in order `0, 1, 2, ...`.
    pub fn link(&mut self, id: u32, key: &[u8]) {
        self.link_hashed(id, xxh3_64(key));
    }

    /// `link` for a caller that hashed the key itself.
    pub fn link_hashed(&mut self, id: u32, hash: u64) {
        debug_assert_eq!(id as usize, self.prev.len());
        let bucket = (hash & self.mask) as usize;
        self.prev.push(self.last[bucket]);
        self.last[bucket] = id;
    }

    /// True once the average chain is longer than `MAX_CHAIN_LOAD`.
    pub fn overloaded(&self) -> bool {
        self.prev.len() > self.last.len() * MAX_CHAIN_LOAD
    }

    pub fn chain(&self, key: &[u8]) -> Chain<'_> {
        self.chain_hashed(xxh3_64(key))
    }

    pub fn chain_hashed(&self, hash: u64) -> Chain<'_> {
        Chain {
            prev: &self.prev,
            cursor: self.last[(hash & self.mask) as usize],
        }
    }
}

/// Record ids of one bucket, newest first.
pub struct Chain<'a> {
    prev: &'a [u32],
    cursor: u32,
}

impl Iterator for Chain<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == NONE_ID {
            return None;
        }
        let id = self.cursor;
        self.cursor = self.prev[id as usize];
        Some(id)
    }
}

fn buckets_for(records: usize) -> usize {
    (records.saturating_mul(2) / MAX_CHAIN_LOAD)
        .max(MIN_HASH_BUCKETS)
        .next_power_of_two()
}

/// Ids on `key`'s chain whose field bytes equal `key`, newest first, at most
/// `max` of them (0 = unbounded).
pub fn collect_matches<'r, F>(
    chains: &ChainIndex,
    key: &[u8],
    max: usize,
    mut field_of: F,
) -> Vec<u64>
where
    F: FnMut(u32) -> &'r [u8],
{
    let mut matches = Vec::new();
    for id in chains.chain(key) {
        if field_of(id) == key {
            matches.push(id as u64);
            if matches.len() == max {
                break;
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_walks_newest_first() {
        let keys: [&[u8]; 4] = [b"A", b"B", b"A", b"A"];
        let mut chains = ChainIndex::with_capacity(8);
        for (id, key) in keys.iter().enumerate() {
            chains.link(id as u32, key);
        }

        let matches = collect_matches(&chains, b"A", 0, |id| keys[id as usize]);

        assert_eq!(matches, vec![3, 2, 0]);
        assert_eq!(chains.len(), 4);
    }

    #[test]
    fn collisions_are_filtered_by_bytes() {
        let mut chains = ChainIndex::with_capacity(4);
        let keys: Vec<Vec<u8>> = (0..5000u32).map(|i| format!("S{}", i % 7).into_bytes()).collect();
        for (id, key) in keys.iter().enumerate() {
            chains.link(id as u32, key);
        }

        let matches = collect_matches(&chains, b"S3", 0, |id| keys[id as usize].as_slice());

        assert_eq!(matches.len(), 5000 / 7 + usize::from(5000 % 7 > 3));
        assert!(matches.windows(2).all(|w| w[0] > w[1]));
        assert!(matches.iter().all(|&id| id % 7 == 3));
    }

    #[test]
    fn hashed_links_share_buckets_with_keyed_links() {
        let mut chains = ChainIndex::with_capacity(8);
        chains.link(0, b"K");
        chains.link_hashed(1, xxh3_64(b"K"));

        assert_eq!(chains.chain(b"K").collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(chains.chain_hashed(xxh3_64(b"K")).count(), 2);
    }

    #[test]
    fn max_matches_stops_early() {
        let mut chains = ChainIndex::with_capacity(16);
        for id in 0..10 {
            chains.link(id, b"X");
        }

        let matches = collect_matches(&chains, b"X", 3, |_| b"X".as_slice());

        assert_eq!(matches, vec![9, 8, 7]);
    }

    #[test]
    fn bucket_count_tracks_record_count() {
        assert_eq!(ChainIndex::with_capacity(0).buckets(), MIN_HASH_BUCKETS);

        let big = ChainIndex::with_capacity(1 << 20);
        assert!(big.buckets().is_power_of_two());
        assert!(big.buckets() * MAX_CHAIN_LOAD >= 1 << 20);
    }

    #[test]
    fn overload_is_detected() {
        let mut chains = ChainIndex::with_capacity(0);
        for id in 0..(MIN_HASH_BUCKETS * MAX_CHAIN_LOAD) as u32 {
            chains.link(id, &id.to_le_bytes());
        }
        assert!(!chains.overloaded());

        chains.link((MIN_HASH_BUCKETS * MAX_CHAIN_LOAD) as u32, b"one more");
        assert!(chains.overloaded());
    }
}
