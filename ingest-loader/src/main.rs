//! Incremental loader service binary.
//!
//! Loads configuration, initializes tracing, and runs one incremental load
//! cycle over the configured tables. The process exit code reflects whether
//! every table completed its run.

use clap::Parser;
use ingest_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_loader_config;
use crate::core::start_loader;

mod config;
mod core;

/// Incremental loader - extracts source deltas and merges them into the
/// bronze changelog.
#[derive(Parser, Debug)]
#[command(name = "ingest-loader")]
#[command(about = "Runs one incremental load cycle into the bronze changelog")]
struct Args {
    /// Restrict the cycle to a comma-separated subset of configured tables.
    #[arg(long, value_delimiter = ',')]
    tables: Option<Vec<String>>,
}

#[tokio::main]
async fn main() {
    init_tracing(env!("CARGO_BIN_NAME"));

    if let Err(err) = run().await {
        error!("loader failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let loader_config = load_loader_config()?;

    start_loader(loader_config, args.tables).await
}
