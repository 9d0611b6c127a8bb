//! Modhost CLI - watch, inspect and run module packages

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_directive = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output.unwrap_or_default();

    match cli.command {
        Commands::Watch { dir } => {
            let config = commands::load_config(cli.config.as_deref(), dir)?;
            commands::watch::run(config).await?;
        }

        Commands::Inspect { package } => {
            commands::inspect::run(&package, format)?;
        }

        Commands::Run { package } => {
            let config = commands::load_config(cli.config.as_deref(), None)?;
            commands::run::run(config, &package, format)?;
        }
    }

    Ok(())
}
