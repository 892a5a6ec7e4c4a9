//! Outreach CLI — personalized outreach message generation.
//!
//! Submits a templated message job, polls it to completion, and prints the
//! composed message.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
