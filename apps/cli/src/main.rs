//! ContentForge CLI: brand-grounded content generation.
//!
//! Runs the Document, Monitor, Brief, Publish and Iterate stages against a
//! local knowledge base and writes a JSON run log for every run.

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
