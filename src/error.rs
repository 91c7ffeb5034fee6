//! Error types shared across ranks.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::Rank;

/// Where the coordinator was when a worker let it down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Requesting,
    Merging,
    Terminating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Requesting => "requesting data",
            Phase::Merging => "merging",
            Phase::Terminating => "terminating",
        })
    }
}

/// Conditions that abort a whole run.
///
/// None of these are retried: counts from a partially failed run are never
/// merged into a report.
#[derive(Debug, Error)]
pub enum TrendError {
    #[error("no trend mode selected; pass -t for hashtags, -l for languages, or --mode <NAME>")]
    ModeUnset,

    #[error("no trend mode named `{0}`; expected `hashtags` or `language`")]
    UnknownMode(String),

    #[error("a run needs at least one rank")]
    NoWorkers,

    #[error("worker {rank} failed while {phase}: its channel closed")]
    WorkerFailed { rank: Rank, phase: Phase },

    #[error("worker {rank} did not answer within {timeout:?} while {phase}")]
    WorkerTimeout {
        rank: Rank,
        phase: Phase,
        timeout: Duration,
    },

    #[error("protocol violation at rank {rank}: {detail}")]
    Protocol { rank: Rank, detail: String },

    #[error("rank {rank} lost its coordinator while awaiting commands")]
    CoordinatorLost { rank: Rank },

    #[error("only {joined} of {expected} workers joined within {timeout:?}")]
    JoinTimeout {
        joined: usize,
        expected: usize,
        timeout: Duration,
    },

    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A single record that cannot be counted. Always skipped, never fatal.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record has no `{0}` field")]
    MissingField(&'static str),
}
