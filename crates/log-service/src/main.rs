//! Log service gateway binary.
//!
//! Accepts log records over HTTP and over a persistent JSON-RPC connection
//! and stores them in the document store.

use anyhow::Result;
use clap::Parser;
use log_service::{Args, Gateway, LogFormat};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_format);

    info!("Starting log service");

    let config = args.into_config()?;
    let gateway = Gateway::builder(config).start().await?;

    // Machine-readable listener ports (intentional stdout)
    println!("WEB_PORT={}", gateway.web_addr().port());
    println!("RPC_PORT={}", gateway.rpc_addr().port());

    info!(
        "Serving HTTP on {} and RPC on {}",
        gateway.web_addr(),
        gateway.rpc_addr()
    );

    // A shutdown error is already logged by the gateway; it still fails the exit status.
    gateway.run_until_signal().await?;

    Ok(())
}

fn init_logging(debug: bool, format: LogFormat) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
