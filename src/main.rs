//! They Might Say - Studio CLI
//!
//! Log in, manage episodes and sources, and hold streamed Studio
//! conversations from the terminal.

mod cli;

use anyhow::Result;
use clap::Parser;
use they_might_say::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing (stderr, so streamed replies on stdout stay clean)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,they_might_say=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();

    // Load configuration
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    cli::run(cli, config).await
}
