//! filedrop: single-file-per-connection TCP transfer
//!
//! Two roles share one fixed binary header (260 byte name, 8 byte size):
//! - `serve`: accept connections and write each transfer to a folder
//! - `send`: drive concurrent workers sending generated files and report
//!   aggregate throughput
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod driver;
mod payload;
mod protocol;
mod server;
mod session;

use config::{Config, Mode, SenderConfig, ServerConfig};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Serve(server) => run_server(server).await,
        Mode::Send(sender) => run_sender(sender).await,
    }
}

/// Receive files until the process is killed
async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        port = config.port,
        folder = %config.folder.display(),
        "Starting filedrop server"
    );

    let server = Server::bind(&config).await?;
    server.serve().await;
    Ok(())
}

/// Run the load generator and report throughput
async fn run_sender(config: SenderConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("running {} workers", config.workers);
    info!("repeating {} times", config.times);

    let report = driver::run(&config).await;

    if config.fail_fast && report.failed > 0 {
        return Err(format!("{} transfers failed", report.failed).into());
    }
    Ok(())
}
