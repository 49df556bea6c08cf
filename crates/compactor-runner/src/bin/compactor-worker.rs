//! Compactor Worker - Reference worker process
//!
//! Reads newline-delimited JSON requests on stdin and writes one reply
//! per request on stdout. Stdout carries only protocol traffic; all
//! diagnostics go to stderr so the parent can forward them.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use compactor_core::BasicMinifier;
use compactor_runner::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    worker::serve(Arc::new(BasicMinifier)).await?;
    Ok(())
}
