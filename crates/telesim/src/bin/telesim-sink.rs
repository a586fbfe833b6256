//! Local ingestion endpoint for smoke-testing the simulator.

use clap::Parser;
use telesim::logging::init_logging;
use telesim::Sink;
use telesim_common::LoggingConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "telesim-sink", version)]
struct Cli {
    /// Address to accept WebSocket clients on
    #[arg(long, default_value = "127.0.0.1:3001")]
    listen: String,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        json: cli.json_logs,
        ..Default::default()
    });

    let sink = Sink::bind(&cli.listen).await?;
    let handle = sink.handle();
    let master_token = CancellationToken::new();

    let signal_token = master_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    sink.run(master_token).await;

    info!(
        connections = handle.connections(),
        frames = handle.frames_received(),
        rejected = handle.frames_rejected(),
        devices = handle.device_ids().len(),
        "Sink stopped"
    );
    Ok(())
}
