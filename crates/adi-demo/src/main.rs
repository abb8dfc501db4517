//! ADI demo runner - Entry Point
//!
//! Incubates the configured feeds against the simulated gateway once and
//! exits.

use adi_demo::{Application, DemoConfig};
use anyhow::Result;
use clap::Parser;
use tracing::info;

/// ADI subscription and incubation demo
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ADI_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    adi_telemetry::init_logging()?;

    info!("Starting ADI demo v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > ADI_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("ADI_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = DemoConfig::from_file(&config_path)?;
    info!(
        account = %config.account,
        definitions = config.definitions.len(),
        "Configuration loaded"
    );

    let app = Application::new(config)?;

    tokio::select! {
        report = app.run() => {
            let report = report?;
            info!(
                account_outcome = report.account_outcome.as_str(),
                incubations = report.incubations.len(),
                "Demo finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
