use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "labelgate", about = "Tag outbound LLM calls with the active feature label")]
pub struct Args {
    /// Manifest to load (default: ./labelgate.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Label file to use instead of the configured store
    #[arg(long = "state-file", global = true)]
    pub state_file: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway: context endpoints plus upstream passthrough
    Serve(ServeArgs),
    /// Print the active feature label
    Get,
    /// Set the active feature label
    Set {
        /// New label, stored verbatim
        feature: String,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Listen address, e.g. 127.0.0.1:4000
    #[arg(long)]
    pub addr: Option<SocketAddr>,
    /// Upstream base URL that unmatched requests are forwarded to
    #[arg(long)]
    pub upstream: Option<String>,
}
