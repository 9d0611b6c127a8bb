//! `modhost run` command implementation

use std::path::Path;

use colored::Colorize;
use modhost_kernel::config::RuntimeConfig;
use modhost_runtime::ModuleManager;
use serde::Serialize;
use tracing::debug;

use crate::output::{OutputFormat, print_json};

#[derive(Debug, Serialize)]
struct RunOutcome {
    module: String,
    generation: Option<u64>,
    load_ms: u128,
    output: String,
}

/// Execute the `modhost run` command
pub fn run(config: RuntimeConfig, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let manager = ModuleManager::new(config);

    let report = manager.load_package(path);
    if !report.success {
        anyhow::bail!(
            "failed to load {}: {}",
            report.name,
            report.error.unwrap_or_default()
        );
    }
    debug!("Loaded {} in {:?}", report.name, report.duration);

    let result = manager.execute(&report.name);
    manager.shutdown();
    let output = result?;

    match format {
        OutputFormat::Json => print_json(&RunOutcome {
            module: report.name,
            generation: report.generation,
            load_ms: report.duration.as_millis(),
            output,
        })?,
        OutputFormat::Text => {
            println!("{} {}", "→".green(), report.name.cyan());
            println!("{}", output);
        }
    }
    Ok(())
}
