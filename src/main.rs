mod cli;
mod config;
mod core;
mod dashboard;
mod documents;
mod onboarding;
mod snapshot;
mod store;
mod tasks;
pub mod utils;
mod writers;

#[cfg(test)]
mod testing;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing goes to stderr so command output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = config::config_path();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = config::AppConfig::load(&config_path)?;
            runtime.block_on(crate::core::run(config))
        }
        command => {
            runtime.block_on(cli::dispatch(&config_path, command));
            Ok(())
        }
    }
}
