//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Median store CLI
#[derive(Parser)]
#[command(name = "median-store")]
#[command(about = "Expiring per-key sample store with running medians")]
#[command(version)]
pub struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to, overriding server.host and server.port
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Print the effective configuration as TOML
    Config,
}
