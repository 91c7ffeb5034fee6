//! Utility functions shared by the launcher binaries.
//!

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::Rank;

/// How many ranks to run when none is requested: one per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// The line every rank prints when it starts.
pub fn rank_banner(rank: Rank) -> String {
    format!("This message is sent from rank {}.", rank)
}

/// The line printed once a run has finished.
pub fn timing_line(elapsed: Duration) -> String {
    format!("The total time of the execution is: {}", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn there_is_always_a_rank() {
        assert!(default_workers() >= 1);
    }

    #[test]
    fn banner_names_the_rank() {
        assert_eq!(rank_banner(3), "This message is sent from rank 3.");
    }
}
