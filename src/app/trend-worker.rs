use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use trendlite::cmd::worker::Args;
use trendlite::protocol::tcp;
use trendlite::standalone::engine::run_worker;
use trendlite::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let args = Args::parse();

    let (link, assignment) = tcp::join(args.join.as_str())
        .await
        .with_context(|| format!("cannot join coordinator at {}", args.join))?;
    info!(
        run_id = %assignment.run_id,
        rank = assignment.shard.rank,
        input = %assignment.input,
        mode = %assignment.mode,
        "Joined run"
    );

    run_worker(&assignment.input, assignment.mode, assignment.shard, link).await
}
