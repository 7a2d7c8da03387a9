//! Dense date-range index.
//!
//! While dates arrive in non-decreasing order, every day's records form one
//! contiguous id range, so two arrays indexed by `day - base` answer a range
//! query with one load each:
//!
//! ```text
//! day:    base  base+1  base+2  base+3
//! first:    0     NONE      3       5
//! last:     2     NONE      4       5
//! ```
//!
//! The index covers a window: the longest non-decreasing suffix of the record
//! array whose day span fits `MAX_DATE_SPAN_DAYS`. Records before the window
//! are not covered, but their days are remembered: a day with any record
//! before the window has no single id range, and `range` answers `None` for
//! it. An append with a date earlier than the newest indexed one cannot be
//! represented and is reported as `OutOfOrder`.

use std::ops::Range;

use hashbrown::HashSet;

use crate::config::{MAX_DATE_SPAN_DAYS, NONE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateAppend {
    Linked,
    OutOfOrder,
}

#[derive(Debug, Clone, Default)]
pub struct DateIndex {
    base: i32,
    first: Vec<u32>,
    last: Vec<u32>,
    window_start: u64,
    /// Days of the records in `[0, window_start)`.
    uncovered: HashSet<i32>,
}

impl DateIndex {
    /// Builds the window over `dates`, the date of every record in id order.
    pub fn build(dates: &[i32]) -> Self {
        let mut index = Self::default();
        let Some(&newest) = dates.last() else {
            return index;
        };

        let mut start = dates.len() - 1;
        while start > 0 {
            let candidate = dates[start - 1];
            if candidate > dates[start] || span(candidate, newest) > MAX_DATE_SPAN_DAYS {
                break;
            }
            start -= 1;
        }

        index.window_start = start as u64;
        index.uncovered = dates[..start].iter().copied().collect();
        for (offset, &date) in dates[start..].iter().enumerate() {
            let linked = index.append((start + offset) as u32, date);
            debug_assert_eq!(linked, DateAppend::Linked);
        }
        index
    }

    /// Adds the next record. `id` must be one past the last appended id.
    pub fn append(&mut self, id: u32, date: i32) -> DateAppend {
        if self.first.is_empty() {
            self.base = date;
            self.window_start = id as u64;
            self.first.push(id);
            self.last.push(id);
            return DateAppend::Linked;
        }

        let newest = self.base + self.last.len() as i32 - 1;
        if date < newest {
            return DateAppend::OutOfOrder;
        }
        if span(self.base, date) > MAX_DATE_SPAN_DAYS {
            // Restart the window at this record.
            let mut uncovered = std::mem::take(&mut self.uncovered);
            uncovered.extend(self.covered_days());
            *self = Self {
                uncovered,
                ..Self::default()
            };
            return self.append(id, date);
        }

        let slot = (date - self.base) as usize;
        if slot >= self.first.len() {
            self.first.resize(slot + 1, NONE_ID);
            self.last.resize(slot + 1, NONE_ID);
        }
        if self.first[slot] == NONE_ID {
            self.first[slot] = id;
        }
        self.last[slot] = id;
        DateAppend::Linked
    }

    /// Ids of the records dated `day`, empty when there are none. `None`
    /// when some of them lie before the window.
    pub fn range(&self, day: i32) -> Option<Range<u64>> {
        if self.uncovered.contains(&day) {
            return None;
        }
        Some(self.window_range(day))
    }

    /// Ids of the window's records dated `day`, ignoring records before it.
    pub fn window_range(&self, day: i32) -> Range<u64> {
        if self.first.is_empty() || day < self.base {
            return 0..0;
        }
        let slot = (day as i64 - self.base as i64) as usize;
        match (self.first.get(slot), self.last.get(slot)) {
            (Some(&first), Some(&last)) if first != NONE_ID => first as u64..last as u64 + 1,
            _ => 0..0,
        }
    }

    /// First record id covered by the window.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    fn covered_days(&self) -> impl Iterator<Item = i32> + '_ {
        let base = self.base;
        self.first
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id != NONE_ID)
            .map(move |(slot, _)| base + slot as i32)
    }
}

fn span(from: i32, to: i32) -> usize {
    (to as i64 - from as i64 + 1).max(0) as usize
}
