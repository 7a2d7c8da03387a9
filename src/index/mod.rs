//! # Primary-Key Index
//!
//! Each table handle keeps a process-local index over the shared record
//! array. It is built from the records themselves, so any handle can
//! reconstruct it at any time and nothing but two header flags and a
//! generation counter is shared.
//!
//! ## Structures
//!
//! | Structure   | Keyed by         | Answers                              |
//! |-------------|------------------|--------------------------------------|
//! | `key`       | full primary key | `lookup_key`                         |
//! | `symbol`    | symbol           | `lookup_symbol`                      |
//! | `portfolio` | portfolio        | `lookup_portfolio`                   |
//! | `dates`     | day number       | `date_range`, `date_ids`             |
//!
//! Key lookups walk the key chain of the key's bucket and compare date,
//! symbol and portfolio at every node, so hash collisions never produce false
//! matches. The bucket hash covers all three fields, so a symbol with a long
//! history does not lengthen the walk. Chains are walked newest first; if an
//! externally corrupted file holds a key twice, the newest record wins.
//!
//! ## Validity
//!
//! The index covers records `[0, indexed)`. It is extended with `catch_up` as
//! other handles append, and rebuilt from scratch when
//!
//! - it has never been built or was invalidated,
//! - the header generation differs from the one it was built against,
//! - an appended date goes backwards (`CatchUp::OutOfOrder`).
//!
//! Every query on an invalid index fails with `TableError::IndexStale`; the
//! table handle turns that into a rebuild before any lookup answers.

mod chain;
mod date;

use std::ops::Range;

use smallvec::SmallVec;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::TableError;
use crate::layout::{RecordKey, RecordLayout};

pub use chain::{collect_matches, Chain, ChainIndex};
pub use date::{DateAppend, DateIndex};

/// Result of extending a valid index with newly published records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUp {
    /// Records up to the given count are indexed.
    Current(u64),
    /// A date went backwards; the index was invalidated and needs a rebuild.
    OutOfOrder,
}

/// Record ids of a symbol or portfolio query, newest first.
pub type Matches = SmallVec<[u64; 16]>;

#[derive(Debug, Clone)]
pub struct PrimaryKeyIndex {
    key: ChainIndex,
    symbol: ChainIndex,
    portfolio: ChainIndex,
    dates: DateIndex,
    indexed: u64,
    generation: u64,
    valid: bool,
}

impl Default for PrimaryKeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimaryKeyIndex {
    /// An empty, invalid index.
    pub fn new() -> Self {
        Self {
            key: ChainIndex::with_capacity(0),
            symbol: ChainIndex::with_capacity(0),
            portfolio: ChainIndex::with_capacity(0),
            dates: DateIndex::default(),
            indexed: 0,
            generation: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of records covered.
    pub fn indexed(&self) -> u64 {
        self.indexed
    }

    /// Header generation this index was built against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Rebuilds every structure over records `[0, count)` of `records`.
    pub fn rebuild(&mut self, records: &[u8], layout: &RecordLayout, count: u64, generation: u64) {
        self.valid = false;

        let width = layout.width();
        let count_usize = count as usize;
        let mut key = ChainIndex::with_capacity(count_usize);
        let mut symbol = ChainIndex::with_capacity(count_usize);
        let mut portfolio = ChainIndex::with_capacity(count_usize);
        let mut dates = Vec::with_capacity(count_usize);

        for (id, record) in records[..count_usize * width].chunks_exact(width).enumerate() {
            key.link_hashed(id as u32, record_key_hash(layout, record));
            symbol.link(id as u32, layout.symbol_of(record));
            portfolio.link(id as u32, layout.portfolio_of(record));
            dates.push(layout.date_of(record));
        }

        self.key = key;
        self.symbol = symbol;
        self.portfolio = portfolio;
        self.dates = DateIndex::build(&dates);
        self.indexed = count;
        self.generation = generation;
        self.valid = true;

        debug!(
            count,
            generation,
            key_buckets = self.key.buckets(),
            date_window_start = self.dates.window_start(),
            "index rebuilt"
        );
    }

    /// Links records `[indexed, count)`. On an out-of-order date the index
    /// is invalidated and `CatchUp::OutOfOrder` is returned.
    pub fn catch_up(
        &mut self,
        records: &[u8],
        layout: &RecordLayout,
        count: u64,
    ) -> Result<CatchUp, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }

        let width = layout.width();
        for id in self.indexed..count {
            let start = id as usize * width;
            let record = &records[start..start + width];

            if self.dates.append(id as u32, layout.date_of(record)) == DateAppend::OutOfOrder {
                self.valid = false;
                return Ok(CatchUp::OutOfOrder);
            }
            self.key.link_hashed(id as u32, record_key_hash(layout, record));
            self.symbol.link(id as u32, layout.symbol_of(record));
            self.portfolio.link(id as u32, layout.portfolio_of(record));
            self.indexed = id + 1;
        }

        if self.key.overloaded() || self.symbol.overloaded() || self.portfolio.overloaded() {
            let generation = self.generation;
            self.rebuild(records, layout, count, generation);
        }

        Ok(CatchUp::Current(self.indexed))
    }

    /// Id of the record with `key`, if indexed.
    pub fn lookup_key(
        &self,
        records: &[u8],
        layout: &RecordLayout,
        key: &RecordKey,
    ) -> Result<Option<u64>, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }

        let width = layout.width();
        Ok(self
            .key
            .chain_hashed(key_hash(key.date, &key.symbol, &key.portfolio))
            .find(|&id| {
                let start = id as usize * width;
                layout.key_matches(&records[start..start + width], key)
            })
            .map(u64::from))
    }

    pub fn lookup_symbol(
        &self,
        records: &[u8],
        layout: &RecordLayout,
        symbol: &[u8],
        max_matches: usize,
    ) -> Result<Matches, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }
        let width = layout.width();
        let found = collect_matches(&self.symbol, symbol, max_matches, |id| {
            let start = id as usize * width;
            layout.symbol_of(&records[start..start + width])
        });
        Ok(found.into_iter().collect())
    }

    pub fn lookup_portfolio(
        &self,
        records: &[u8],
        layout: &RecordLayout,
        portfolio: &[u8],
        max_matches: usize,
    ) -> Result<Matches, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }
        let width = layout.width();
        let found = collect_matches(&self.portfolio, portfolio, max_matches, |id| {
            let start = id as usize * width;
            layout.portfolio_of(&records[start..start + width])
        });
        Ok(found.into_iter().collect())
    }

    /// Contiguous ids dated `day`. Fails with `DateNotContiguous` when some
    /// of them precede the date window.
    pub fn date_range(&self, day: i32) -> Result<Range<u64>, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }
        self.dates.range(day).ok_or(TableError::DateNotContiguous(day))
    }

    /// Every indexed id dated `day`, ascending. Records before the date
    /// window are scanned only for days that have some there.
    pub fn date_ids(
        &self,
        records: &[u8],
        layout: &RecordLayout,
        day: i32,
    ) -> Result<Vec<u64>, TableError> {
        if !self.valid {
            return Err(TableError::IndexStale);
        }
        if let Some(range) = self.dates.range(day) {
            return Ok(range.collect());
        }

        let width = layout.width();
        let before = self.dates.window_start().min(self.indexed) as usize;
        let mut ids: Vec<u64> = records[..before * width]
            .chunks_exact(width)
            .enumerate()
            .filter(|(_, record)| layout.date_of(record) == day)
            .map(|(id, _)| id as u64)
            .collect();
        ids.extend(self.dates.window_range(day));
        Ok(ids)
    }
}

/// Bucket hash of a primary key. Byte fields are length-prefixed so that
/// `("AB", "C")` and `("A", "BC")` hash apart.
pub fn key_hash(date: i32, symbol: &[u8], portfolio: &[u8]) -> u64 {
    let mut buf: SmallVec<[u8; 64]> = SmallVec::new();
    buf.extend_from_slice(&date.to_le_bytes());
    buf.push(symbol.len() as u8);
    buf.extend_from_slice(symbol);
    buf.extend_from_slice(portfolio);
    xxh3_64(&buf)
}

fn record_key_hash(layout: &RecordLayout, record: &[u8]) -> u64 {
    key_hash(
        layout.date_of(record),
        layout.symbol_of(record),
        layout.portfolio_of(record),
    )
}
