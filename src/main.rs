//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `stream_relay` library that handles:
//! - Command-line argument parsing
//! - Logger initialization
//! - Writing relayed fragments (or a JSON snapshot) to stdout
//!
//! All core functionality is implemented in the library crate.

use std::io::Write;
use std::process;

use anyhow::{Context, Result};
use log::info;
use structopt::StructOpt;

use stream_relay::initialization::init_logger_with;
use stream_relay::{Opt, RelayItem, StreamClient};

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    let config = opt.to_config();

    init_logger_with(config.log_level.clone().into(), config.log_format.clone())
        .context("Failed to initialize logger")?;

    let (endpoint, request) = opt.build_request().context("Invalid request options")?;
    let client = StreamClient::new(&config).context("Failed to initialize client")?;

    if opt.whole {
        let snapshot = client
            .fetch(&endpoint, opt.proxy.as_deref(), request)
            .await
            .with_context(|| format!("Fetch from {endpoint} failed"))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to encode snapshot")?
        );
        return Ok(());
    }

    let mut rx = client.stream_request(
        endpoint.clone(),
        opt.proxy.clone(),
        request,
        opt.expected_status(),
    );
    let mut stdout = std::io::stdout().lock();
    let mut fragments = 0usize;
    while let Some(item) = rx.recv().await {
        match item {
            RelayItem::Fragment(text) => {
                fragments += 1;
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|_| stdout.flush())
                    .context("Failed to write to stdout")?;
            }
            RelayItem::Error(message) => {
                eprintln!("stream_relay error: {message}");
                process::exit(1);
            }
        }
    }
    info!("Relayed {fragments} fragment(s) from {endpoint}");
    Ok(())
}
