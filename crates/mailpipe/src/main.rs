//! `mailpipe` - forward log lines from stdin to an SMTP server.
//!
//! Each input line becomes one message. Delivery runs on the driver's
//! worker thread; this process waits for the acknowledgments at EOF.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod pending;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mailpipe_core::{DriverConfig, LogMessage, LogPipe, PathOptions, SmtpDriver};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pending::PendingAcks;

/// Forward log lines from stdin to an SMTP server.
#[derive(Parser, Debug)]
#[command(name = "mailpipe", version)]
struct Args {
    /// Driver configuration (JSON). Defaults to `<config dir>/mailpipe/config.json`.
    #[arg(long, env = "MAILPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Driver id used in logs and statistics.
    #[arg(long, default_value = "d_smtp")]
    id: String,

    /// Seconds to wait for outstanding deliveries after EOF.
    #[arg(long, default_value = "30")]
    drain_timeout: f64,

    /// Value of `$HOST` for every message.
    #[arg(long, env = "HOSTNAME", default_value = "localhost")]
    hostname: String,
}

fn config_path(args: &Args) -> Result<PathBuf> {
    if let Some(path) = &args.config {
        return Ok(path.clone());
    }
    let dir = dirs::config_dir().context("No configuration directory; pass --config")?;
    Ok(dir.join("mailpipe").join("config.json"))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailpipe=info,mailpipe_core=info,mailpipe_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let drain_timeout = Duration::try_from_secs_f64(args.drain_timeout)
        .context("--drain-timeout must be a non-negative number of seconds")?;

    let path = config_path(&args)?;
    let config = DriverConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let mut driver =
        SmtpDriver::new(args.id.clone(), config).context("Invalid driver configuration")?;
    driver.init().context("Failed to start SMTP destination")?;
    info!(driver = %driver.id(), instance = driver.persist_name(), "Forwarding stdin");

    let pending = Arc::new(PendingAcks::default());
    let options = PathOptions::flow_controlled(pending.clone());

    let mut read = 0usize;
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let msg = LogMessage::new(line)
            .with_host(args.hostname.as_str())
            .with_program("mailpipe")
            .with_pid(std::process::id());
        driver.enqueue(Arc::new(msg), &options)?;
        read += 1;
    }

    if !pending.wait_drained(drain_timeout) {
        warn!(
            queued = driver.queued(),
            drain_timeout = drain_timeout.as_secs_f64(),
            "Drain timeout reached with messages outstanding"
        );
    }
    driver.destroy().context("Failed to stop SMTP destination")?;

    let summary = pending.summary();
    info!(
        read,
        delivered = summary.delivered,
        undelivered = summary.requeued + summary.outstanding,
        "Done"
    );
    if summary.delivered < read {
        anyhow::bail!("{} of {read} messages were not delivered", read - summary.delivered);
    }
    Ok(())
}
