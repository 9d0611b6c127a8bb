//! `modhost watch` command implementation

use std::sync::Arc;

use colored::Colorize;
use modhost_kernel::config::RuntimeConfig;
use modhost_runtime::{ModuleEvent, ModuleManager};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Execute the `modhost watch` command.
///
/// Packages already present are picked up by the first polling tick.
pub async fn run(config: RuntimeConfig) -> anyhow::Result<()> {
    let dir = config.watch_dir.clone();
    if !dir.is_dir() {
        anyhow::bail!("watch directory {} does not exist", dir.display());
    }

    let manager = Arc::new(ModuleManager::new(config));
    let mut events = manager.subscribe();
    manager.start_watching()?;
    println!(
        "{} Watching {} (Ctrl-C to stop)",
        "→".green(),
        dir.display().to_string().cyan()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} module events", missed),
                Err(RecvError::Closed) => break,
            },
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || manager.shutdown()).await?;
    Ok(())
}

fn print_event(event: &ModuleEvent) {
    match event {
        ModuleEvent::PackageDiscovered { path } => {
            println!("  {} {}", "found".blue(), path.display());
        }
        ModuleEvent::Loaded {
            name,
            generation,
            duration,
            ..
        } => {
            println!(
                "  {} {} (generation {}, {:?})",
                "loaded".green(),
                name.cyan(),
                generation,
                duration
            );
        }
        ModuleEvent::Removed { name } => {
            println!("  {} {}", "removed".yellow(), name.cyan());
        }
        ModuleEvent::Failed { name, error } => {
            println!("  {} {}: {}", "failed".red(), name, error);
        }
        other => println!("  {:?}", other),
    }
}
