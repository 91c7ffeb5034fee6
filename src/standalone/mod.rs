use std::time::Duration;

use clap::Parser;

use crate::cmd::JobArgs;
use crate::Mode;

pub mod engine;

#[derive(Parser, Debug)]
#[command(version, about = "Find trending hashtags or languages on one host", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub job: JobArgs,
}

/// A validated trend run.
#[derive(Debug, Clone)]
pub struct Job {
    /// Path or glob spec of the record source.
    pub input: String,
    pub mode: Mode,
    /// How many trends to report.
    pub top: usize,
    /// Total number of ranks, coordinator included.
    pub workers: usize,
    /// Bound on each worker's reply.
    pub timeout: Duration,
}
