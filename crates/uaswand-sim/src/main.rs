//! UAS-WAND simulator entry point.
//!
//! Starts both fronts over one shared simulated device and runs until
//! Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uaswand_sim::{FramedServer, HttpServer, SimState};

#[derive(Parser)]
#[command(name = "uaswand-sim", about = "UAS-WAND device simulator", version)]
struct Cli {
    /// Port for the framed TCP front (loopback only).
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Port for the HTTP front (loopback only).
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Artificial latency added to every handled request, in milliseconds.
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut state = SimState::new();
    state.latency = Duration::from_millis(cli.latency_ms);
    let state = Arc::new(state);

    let framed = FramedServer::start(Arc::clone(&state), cli.port).await?;
    let http = HttpServer::start(Arc::clone(&state), cli.http_port)?;

    info!(
        framed_port = framed.port(),
        http_port = http.port(),
        "simulator ready, press Ctrl-C to exit"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    framed.shutdown().await;
    http.shutdown().await;
    Ok(())
}
