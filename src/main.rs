//! cloudwatcher - AWS CloudWatch poller
//!
//! Retrieves EC2 metrics and log events from CloudWatch and renders them as
//! tables, summaries, plots and files.

mod cli;
mod client;
mod config;
mod logs;
mod metrics;
mod preset;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.debug { "cloudwatcher=debug" } else { "cloudwatcher=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    tracing::debug!("CLI arguments: {:?}", cli);
    cli::run(cli)
}
