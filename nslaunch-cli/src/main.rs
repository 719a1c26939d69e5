//! nslaunch CLI
//!
//! Runs a program in fresh Linux namespaces and exits with its status.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod profile;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // RUST_LOG wins over -v; logs go to stderr so the child owns stdout
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match commands::dispatch(cli.command).await {
        Ok(status) => process::exit(status),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(commands::failure_status(&e));
        }
    }
}
