//! A distributed top-K trend counter (lite).
//!
//! Every rank scans its own shard of a social-media record dump, counts
//! hashtags or language codes locally, and the coordinator (rank 0) pulls
//! each worker's partial counts through an explicit request/reply handshake
//! before ranking the merged result.
//!
//! Ranks either run as tasks inside one process (see [`standalone`]) or as
//! separate processes talking over TCP (see [`protocol::tcp`]).

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cmd;
pub mod counter;
pub mod error;
pub mod protocol;
pub mod source;
pub mod standalone;
pub mod telemetry;
pub mod topk;
pub mod utils;
pub mod workload;

pub use counter::CountMap;
pub use error::{RecordError, TrendError};
pub use topk::{RankedEntry, Report};

/////////////////////////////////////////////////////////////////////////////
// Ranks and shards
/////////////////////////////////////////////////////////////////////////////

/// A rank's identity within the worker group.
pub type Rank = usize;

/// The rank that coordinates aggregation. It also scans a shard of its own.
pub const COORDINATOR_RANK: Rank = 0;

/// A normalized feature, such as `#rust` or `English(en)`.
pub type FeatureKey = String;

/// The slice of the record source owned by one rank.
///
/// Record `i` belongs to rank `i % workers`, so the shards of all ranks
/// cover every index exactly once.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub rank: Rank,
    pub workers: usize,
}

impl Shard {
    /// Construct the shard for `rank` out of `workers` ranks.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero or `rank` is not below `workers`.
    pub fn new(rank: Rank, workers: usize) -> Self {
        assert!(workers > 0, "a worker group needs at least one rank");
        assert!(rank < workers, "rank {rank} out of range for {workers} ranks");
        Self { rank, workers }
    }

    /// Whether the record at `index` falls in this shard.
    #[inline]
    pub fn owns(&self, index: usize) -> bool {
        index % self.workers == self.rank
    }

    #[inline]
    pub fn is_coordinator(&self) -> bool {
        self.rank == COORDINATOR_RANK
    }
}

/////////////////////////////////////////////////////////////////////////////
// Trend modes
/////////////////////////////////////////////////////////////////////////////

/// Which feature a run counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Hashtags,
    Language,
}

impl Mode {
    /// The name used in reports and by [`workload::try_named`].
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Hashtags => "hashtags",
            Mode::Language => "language",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_cover_every_index_once() {
        for workers in 1..=5 {
            for index in 0..100 {
                let owners = (0..workers)
                    .filter(|&rank| Shard::new(rank, workers).owns(index))
                    .count();
                assert_eq!(owners, 1, "index {index} with {workers} workers");
            }
        }
    }

    #[test]
    #[should_panic]
    fn rank_must_be_below_worker_count() {
        Shard::new(2, 2);
    }
}
