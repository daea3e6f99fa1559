//! Main entry point for the median store CLI.

use anyhow::Result;
use clap::Parser;
use median_store::{cli, server, settings::Settings, telemetry};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::Cli::parse();

    // Load settings
    let settings = Settings::load(args.config.as_deref())?;

    match args.command {
        cli::Commands::Serve { addr } => {
            telemetry::init(&settings.logging)?;
            for warning in settings.warnings() {
                warn!("{warning}");
            }
            server::serve(&settings, addr).await
        }
        cli::Commands::Config => {
            for warning in settings.warnings() {
                eprintln!("warning: {warning}");
            }
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}
