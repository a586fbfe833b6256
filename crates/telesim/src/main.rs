use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use telesim::logging::init_logging;
use telesim::Fanout;
use telesim_common::{Config, Overrides};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Simulate multiple devices sending WebSocket messages.
#[derive(Parser, Debug)]
#[command(name = "telesim", version)]
struct Cli {
    /// Number of devices to simulate [default: 50]
    #[arg(long)]
    devices: Option<u32>,

    /// WebSocket URL to connect to [default: ws://localhost:3001]
    #[arg(long)]
    url: Option<String>,

    /// YAML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum simultaneous connections, 0 for one per device
    #[arg(long)]
    concurrency: Option<usize>,

    /// How long each device holds its connection after sending
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Give up on a device whose handshake takes longer than this
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Cancel the remaining devices after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Exit 0 even when devices fail
    #[arg(long)]
    lenient: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(&Overrides {
            devices: self.devices,
            url: self.url,
            concurrency: self.concurrency,
            hold_ms: self.hold_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            fail_fast: self.fail_fast,
            lenient: self.lenient,
            json_logs: self.json_logs,
        });
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    let config = Cli::parse().into_config()?;
    init_logging(&config.logging);

    let fanout = Fanout::new(&config)?;

    println!(
        "Simulating {} devices, each sending WebSocket messages to {}...",
        fanout.devices(),
        fanout.endpoint()
    );

    let master_token = CancellationToken::new();
    let signal_token = master_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    let summary = fanout.run(master_token).await;
    summary.print_summary();

    if summary.exit_ok(config.policy.strict_exit) {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "Run finished with incomplete devices"
        );
        Ok(ExitCode::FAILURE)
    }
}
