//! rewind operator entry point.
//!
//! - `rewind fetch` - run URLs through the history middleware
//! - `rewind versions` - list the stored versions of a URL
//!
//! Configuration comes from `REWIND_*` variables and `REWIND_CONFIG_FILE`.
//! Results are JSON lines on stdout; logs go to stderr.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{FetchArgs, VersionsArgs};

/// Time-travelling HTTP cache for crawlers
#[derive(Parser)]
#[command(name = "rewind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs, answering from history where configured
    Fetch(FetchArgs),

    /// List the stored versions of a URL
    Versions(VersionsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch(args) => commands::fetch(args).await,
        Commands::Versions(args) => commands::versions(args).await,
    }
}
