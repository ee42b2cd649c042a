//! `autovram`: find the largest stable batch size and precision for a
//! training command.

mod cli;
mod diagnostics;

use anyhow::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr; the human report goes to stdout
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
