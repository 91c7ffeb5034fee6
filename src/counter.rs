//! Feature counting: the per-rank local pass and the merge of partial counts.

use std::io;

use anyhow::Result;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::source::{RecordSource, ShardScanner};
use crate::workload::Extractor;
use crate::{FeatureKey, Shard};

/// Occurrence counts per feature key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountMap(FnvHashMap<FeatureKey, u64>);

impl CountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more occurrence of `key`.
    #[inline]
    pub fn increment(&mut self, key: FeatureKey) {
        self.add(key, 1);
    }

    /// Add `count` occurrences of `key`, starting from zero if it is new.
    #[inline]
    pub fn add(&mut self, key: FeatureKey, count: u64) {
        *self.0.entry(key).or_insert(0) += count;
    }

    /// Fold another map into this one by summing counts per key.
    pub fn merge(&mut self, other: CountMap) {
        self.0.reserve(other.len());
        for (key, count) in other.0 {
            self.add(key, count);
        }
    }

    /// The count of `key`, or zero if it never occurred.
    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureKey, u64)> + '_ {
        self.0.iter().map(|(key, count)| (key, *count))
    }
}

impl FromIterator<(FeatureKey, u64)> for CountMap {
    fn from_iter<T: IntoIterator<Item = (FeatureKey, u64)>>(iter: T) -> Self {
        let mut map = CountMap::new();
        for (key, count) in iter {
            map.add(key, count);
        }
        map
    }
}

/// The frozen result of one rank's local pass.
#[derive(Debug, Default)]
pub struct ShardCount {
    pub counts: CountMap,
    /// Records of the shard that were counted.
    pub records: usize,
    /// Records of the shard that were skipped as malformed.
    pub skipped: usize,
}

/// Count the features of every record in a shard.
///
/// Records the extractor rejects are skipped the same way unparseable rows
/// are. A failing source aborts the count.
pub fn count_shard<I>(mut scanner: ShardScanner<I>, extractor: Extractor) -> Result<ShardCount>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut counts = CountMap::new();
    let mut records = 0;
    while let Some(item) = scanner.next() {
        let (index, record) = item?;
        match extractor.extract(&record) {
            Ok(keys) => {
                records += 1;
                for key in keys {
                    counts.increment(key);
                }
            }
            Err(err) => scanner.skip_record(index, &err),
        }
    }
    Ok(ShardCount {
        counts,
        records,
        skipped: scanner.skipped(),
    })
}

/// Open `input` and count the features of `shard`.
///
/// This blocks on file I/O for the whole pass.
pub fn count_input(input: &str, shard: Shard, extractor: Extractor) -> Result<ShardCount> {
    let source = RecordSource::open(input)?;
    let count = count_shard(ShardScanner::new(source, shard), extractor)?;
    info!(
        rank = shard.rank,
        records = count.records,
        skipped = count.skipped,
        keys = count.counts.len(),
        "Finished scanning shard"
    );
    Ok(count)
}
