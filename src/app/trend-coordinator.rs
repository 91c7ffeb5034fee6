use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;
use trendlite::cmd::coordinator::Args;
use trendlite::protocol::tcp;
use trendlite::standalone::engine::run_coordinator;
use trendlite::{telemetry, utils};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    telemetry::init_tracing()?;
    let args = Args::parse();
    let job = args.job.into_job()?;

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("cannot listen on port {}", args.port))?;
    let run_id = Uuid::new_v4();
    info!(%run_id, addr = %listener.local_addr()?, workers = job.workers, "Coordinator listening");

    let workers = tcp::accept_workers(
        &listener,
        run_id,
        &job.input,
        job.mode,
        job.workers,
        job.timeout,
    )
    .await?;

    let report = run_coordinator(&job, workers).await?;
    print!("{report}");
    println!("{}", utils::timing_line(start.elapsed()));
    Ok(())
}
