//! Ranking merged counts.

use std::cmp::Reverse;
use std::fmt;

use itertools::Itertools;

use crate::{CountMap, FeatureKey, Mode};

/// One line of a top-K report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedEntry {
    pub key: FeatureKey,
    pub count: u64,
}

/// The `k` most frequent keys of `counts`, most frequent first.
///
/// Equal counts are ordered by key, so the ranking of a given map never
/// depends on hash iteration order. Fewer than `k` entries are returned when
/// the map has fewer keys.
pub fn top_k(counts: &CountMap, k: usize) -> Vec<RankedEntry> {
    counts
        .iter()
        .sorted_unstable_by_key(|&(key, count)| (Reverse(count), key))
        .take(k)
        .map(|(key, count)| RankedEntry {
            key: key.clone(),
            count,
        })
        .collect()
}

/// The coordinator's final report.
#[derive(Clone, Debug)]
pub struct Report {
    pub mode: Mode,
    pub top: usize,
    pub entries: Vec<RankedEntry>,
}

impl Report {
    pub fn new(mode: Mode, top: usize, counts: &CountMap) -> Self {
        Self {
            mode,
            top,
            entries: top_k(counts, top),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "The top {} trending {} are:", self.top, self.mode)?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "{}. {}, {}", i + 1, entry.key, entry.count)?;
        }
        Ok(())
    }
}
