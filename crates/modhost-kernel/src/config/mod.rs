//! Runtime configuration
//!
//! Loads [`RuntimeConfig`] from YAML, TOML or JSON files, with `${VAR}` /
//! `$VAR` environment substitution and `MODHOST_*` environment overrides.
//!
//! ## Example
//!
//! ```toml
//! watch_dir = "${HOME}/modules"
//! poll_interval_ms = 500
//! extensions = ["mpk"]
//! ```
//!
//! `MODHOST_POLL_INTERVAL_MS=250` overrides the file value.

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MODHOST";

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory polled for module packages
    pub watch_dir: PathBuf,
    /// Polling interval of the change watcher
    pub poll_interval_ms: u64,
    /// Package file extensions, without the dot
    pub extensions: Vec<String>,
    /// File name patterns the watcher ignores (`*suffix`, `prefix*`, exact)
    pub ignore_patterns: Vec<String>,
    /// Type name prefixes the instrumentation stage leaves untouched
    pub skip_prefixes: Vec<String>,
    /// Capacity of the module event broadcast channel
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("modules"),
            poll_interval_ms: 1000,
            extensions: vec!["mpk".to_string()],
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
            skip_prefixes: vec![
                "std.".to_string(),
                "core.".to_string(),
                "modhost.".to_string(),
            ],
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the watched directory
    pub fn with_watch_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.watch_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Add an instrumentation skip prefix
    pub fn with_skip_prefix(mut self, prefix: &str) -> Self {
        self.skip_prefixes.push(prefix.to_string());
        self
    }

    /// Polling interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Load from a file, then apply `MODHOST_*` environment overrides.
    ///
    /// Without a file only the defaults and the environment apply.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Cfg::builder();

        if let Some(path) = path {
            let format = detect_format(path)?;
            let content = std::fs::read_to_string(path)?;
            debug!("Reading configuration {:?} as {:?}", path, format);
            builder = builder.add_source(File::from_str(&substitute_env_vars(&content), format));
        } else {
            debug!("No configuration file, starting from defaults");
        }

        let overrides = env_overrides();
        if !overrides.is_empty() {
            info!("Applying environment overrides: {}", overrides.join(", "));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("extensions")
                    .with_list_parse_key("ignore_patterns")
                    .with_list_parse_key("skip_prefixes"),
            )
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }
}

/// Names of the `MODHOST_*` variables set in the environment, sorted
pub fn env_overrides() -> Vec<String> {
    let prefix = format!("{}_", ENV_PREFIX);
    let mut names: Vec<String> = std::env::vars_os()
        .filter_map(|(key, _)| key.into_string().ok())
        .filter(|key| key.starts_with(&prefix))
        .collect();
    names.sort();
    names
}

/// Detect configuration format from file extension
///
/// Supported: `.yaml`, `.yml`, `.toml`, `.json`.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced variable pattern is valid")
});

static SIMPLE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple variable pattern is valid")
});

/// Substitute environment variables in a string
///
/// Supports `${VAR_NAME}` and `$VAR_NAME`. Unknown variables are left as
/// written.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            debug!("Environment variable {} is not set, left as written", &caps[1]);
            caps[0].to_string()
        })
    };
    let braced = BRACED_VAR.replace_all(content, lookup);
    SIMPLE_VAR.replace_all(&braced, lookup).into_owned()
}

/// Load any deserializable configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let config = Cfg::builder()
        .add_source(File::from_str(&substitute_env_vars(content), format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests;
