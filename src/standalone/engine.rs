//! Running ranks: the coordinator's and workers' full lifecycles, and the
//! single-host launcher that runs a whole group as tasks of one process.

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::counter::{self, ShardCount};
use crate::protocol::{local, Coordinator, CoordinatorLink, Worker, WorkerHandle};
use crate::standalone::Job;
use crate::{utils, workload, Mode, Report, Shard, COORDINATOR_RANK};

/// Count one shard on a blocking thread.
pub async fn scan(input: &str, mode: Mode, shard: Shard) -> Result<ShardCount> {
    let input = input.to_string();
    let extractor = workload::for_mode(mode);
    tokio::task::spawn_blocking(move || counter::count_input(&input, shard, extractor)).await?
}

/// Scan the coordinator's shard, collect every worker's counts through
/// `workers`, and rank the merged result.
pub async fn run_coordinator<H: WorkerHandle>(job: &Job, workers: Vec<H>) -> Result<Report> {
    let shard = Shard::new(COORDINATOR_RANK, job.workers);
    println!("{}", utils::rank_banner(shard.rank));
    let local = scan(&job.input, job.mode, shard)
        .await
        .context("rank 0 failed while scanning")?;
    let global = Coordinator::new(workers, job.timeout)
        .aggregate(local.counts)
        .await
        .context("aggregation aborted")?;
    Ok(Report::new(job.mode, job.top, &global))
}

/// Scan a worker's shard and serve its counts until the coordinator
/// releases it.
pub async fn run_worker<L: CoordinatorLink>(
    input: &str,
    mode: Mode,
    shard: Shard,
    link: L,
) -> Result<()> {
    println!("{}", utils::rank_banner(shard.rank));
    let local = scan(input, mode, shard)
        .await
        .with_context(|| format!("rank {} failed while scanning", shard.rank))?;
    let sent = Worker::new(shard.rank, link).serve(local.counts).await?;
    debug!(rank = shard.rank, sent, "Worker released");
    Ok(())
}

/// Run every rank of `job` inside this process.
///
/// Each worker rank is its own task with its own channels to the
/// coordinator; ranks share nothing else.
pub async fn run_job(job: &Job) -> Result<Report> {
    let (handles, links) = local::group(job.workers);
    let mut workers = JoinSet::new();
    for link in links {
        let shard = Shard::new(link.rank(), job.workers);
        let input = job.input.clone();
        let mode = job.mode;
        workers.spawn(async move { (shard.rank, run_worker(&input, mode, shard, link).await) });
    }

    let report = run_coordinator(job, handles).await;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((rank, Err(err))) => error!(rank, "Worker failed: {err:#}"),
            Err(err) => error!("Worker task did not finish: {err}"),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(input: &str, mode: Mode, workers: usize) -> Job {
        Job {
            input: input.to_string(),
            mode,
            top: 10,
            workers,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn unreadable_source_fails_the_run() {
        let err = run_job(&job("/no/such/dir/tweets.json", Mode::Hashtags, 3))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("rank 0 failed while scanning"));
    }
}
