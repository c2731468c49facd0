mod archive;
mod cli;
mod config;
mod error;
mod logging;
mod model;
mod orchestrator;
mod pipeline;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.is_interactive();

    cli::run(args).await?;
    // Explicitly exit with code 0 on success, especially for non-TUI modes
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
