use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use trendlite::standalone::{engine::run_job, Args};
use trendlite::{telemetry, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    telemetry::init_tracing()?;
    let args = Args::parse();
    let job = args.job.into_job()?;

    let report = run_job(&job).await?;
    print!("{report}");
    println!("{}", utils::timing_line(start.elapsed()));
    Ok(())
}
