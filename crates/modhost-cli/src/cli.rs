//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Modhost - hot-swappable module runtime
#[derive(Parser)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<OutputFormat>,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "MODHOST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Watch a package directory and hot-load its modules until Ctrl-C
    Watch {
        /// Directory to watch (overrides the configured one)
        dir: Option<PathBuf>,
    },

    /// Show the manifest and type definitions of a package
    Inspect {
        /// Package file
        package: PathBuf,
    },

    /// Load one package and run its entry point once
    Run {
        /// Package file
        package: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["modhost", "inspect", "a.mpk", "-o", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.output, Some(OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Inspect { .. }));
    }

    #[test]
    fn test_watch_dir_is_optional() {
        let cli = Cli::try_parse_from(["modhost", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { dir: None }));
    }
}
