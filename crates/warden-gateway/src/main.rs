//! Warden - sidecar authorization gateway binary.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warden_core::Environment;

/// Policy-enforcement gateway fronting a backend HTTP service.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    // configuration errors are fatal before anything starts
    let env = Environment::from_env()?;

    let filter = EnvFilter::try_new(&env.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    warden_gateway::run(env).await
}
