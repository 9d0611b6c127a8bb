//! Command implementations

pub mod inspect;
pub mod run;
pub mod watch;

use std::path::{Path, PathBuf};

use modhost_kernel::config::RuntimeConfig;

/// Load the runtime configuration, optionally overriding the watch directory
pub fn load_config(path: Option<&Path>, watch_dir: Option<PathBuf>) -> anyhow::Result<RuntimeConfig> {
    let config = RuntimeConfig::load(path)?;
    Ok(match watch_dir {
        Some(dir) => config.with_watch_dir(dir),
        None => config,
    })
}
