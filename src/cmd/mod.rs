//! Command-line arguments of the launcher binaries.

use std::time::Duration;

use clap::Args;

use crate::error::TrendError;
use crate::standalone::Job;
use crate::{utils, workload, Mode};

pub mod coordinator;
pub mod worker;

/// Arguments describing one trend run, shared by every launcher that scans.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Record source: a path or a glob spec for the input files
    #[arg(short, long)]
    pub file: String,
    /// Count hashtags
    #[arg(short = 't', long, conflicts_with = "language")]
    pub hashtags: bool,
    /// Count languages
    #[arg(short = 'l', long)]
    pub language: bool,
    /// Select the mode by name instead: `hashtags` or `language`
    #[arg(long, value_name = "NAME", conflicts_with_all = ["hashtags", "language"])]
    pub mode: Option<String>,
    /// How many trends to report
    #[arg(short = 'k', long, default_value_t = 10, env = "TRENDLITE_TOP")]
    pub top: usize,
    /// Total number of ranks, coordinator included
    #[arg(short = 'n', long, default_value_t = utils::default_workers(), env = "TRENDLITE_WORKERS")]
    pub workers: usize,
    /// Seconds to wait for each worker's reply before aborting the run.
    ///
    /// The clock starts when the coordinator sends its requests, which happens
    /// once its own shard is scanned. A worker still scanning its shard at that
    /// point spends part of this budget on the scan.
    #[arg(long, default_value_t = 60, env = "TRENDLITE_TIMEOUT")]
    pub timeout: u64,
}

impl JobArgs {
    /// The mode selected by `-t`, `-l` or `--mode`.
    pub fn mode(&self) -> Result<Mode, TrendError> {
        if let Some(name) = &self.mode {
            return workload::try_named(name)
                .map(|extractor| extractor.mode)
                .ok_or_else(|| TrendError::UnknownMode(name.clone()));
        }
        match (self.hashtags, self.language) {
            (true, _) => Ok(Mode::Hashtags),
            (_, true) => Ok(Mode::Language),
            _ => Err(TrendError::ModeUnset),
        }
    }

    pub fn into_job(self) -> Result<Job, TrendError> {
        let mode = self.mode()?;
        if self.workers == 0 {
            return Err(TrendError::NoWorkers);
        }
        Ok(Job {
            input: self.file,
            mode,
            top: self.top,
            workers: self.workers,
            timeout: Duration::from_secs(self.timeout),
        })
    }
}
