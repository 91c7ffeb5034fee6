use clap::Parser;

use crate::cmd::JobArgs;

#[derive(Parser, Debug)]
#[command(version, about = "Coordinate a trend run across TCP workers", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub job: JobArgs,
    /// Port for workers to join on
    #[clap(short = 'P', long, default_value_t = 50051, env = "TRENDLITE_PORT")]
    pub port: u16,
}
