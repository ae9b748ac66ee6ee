//! Nexus CLI: build an e-commerce category taxonomy from a product sitemap.
//!
//! Collects product URLs, fetches page content, extracts attributes with a
//! language model and distills them into a navigation tree.

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
