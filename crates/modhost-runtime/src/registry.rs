//! Module metadata
//!
//! Read-only snapshots of loaded modules, as returned by
//! [`ModuleManager::module`](crate::ModuleManager::module).

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use modhost_kernel::ModuleState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::realm::RealmId;

/// Rejected `Module-Version` value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid module version {value:?}: {reason}")]
pub struct VersionError {
    pub value: String,
    pub reason: &'static str,
}

/// Module version from the `Module-Version` manifest attribute.
///
/// Accepts one to three numeric components (`2`, `2.1`, `2.1.4`). A
/// qualifier after `-`, or a fourth dotted component as in `1.0.0.Final`,
/// becomes the pre-release tag; anything after `+` is build metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl ModuleVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse a manifest version string
    pub fn parse(value: &str) -> Result<Self, VersionError> {
        let reject = |reason| VersionError {
            value: value.to_string(),
            reason,
        };

        let text = value.trim();
        let (text, build) = match text.split_once('+') {
            Some((head, meta)) if !meta.is_empty() => (head, Some(meta.to_string())),
            Some(_) => return Err(reject("empty build metadata")),
            None => (text, None),
        };
        let (core, mut prerelease) = match text.split_once('-') {
            Some((core, tag)) if !tag.is_empty() => (core, Some(tag.to_string())),
            Some(_) => return Err(reject("empty qualifier")),
            None => (text, None),
        };

        let mut numbers = [0u32; 3];
        for (index, part) in core.split('.').enumerate() {
            match (index, part.parse::<u32>()) {
                (0..=2, Ok(n)) => {
                    numbers[index] = n;
                }
                (3, _) if prerelease.is_none() && !part.is_empty() => {
                    prerelease = Some(part.to_string());
                }
                (0..=2, Err(_)) => return Err(reject("non-numeric component")),
                _ => return Err(reject("too many components")),
            }
        }
        let [major, minor, patch] = numbers;
        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    /// Version of a manifest attribute; absent or invalid values read as 0.0.0
    pub fn from_manifest(value: Option<&str>) -> Self {
        match value.map(Self::parse) {
            Some(Ok(version)) => version,
            Some(Err(e)) => {
                warn!("Ignoring Module-Version: {}", e);
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Precedence order: numeric core, then a release above its pre-releases.
    /// Build metadata is ignored.
    pub fn precedence(&self, other: &ModuleVersion) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }

    pub fn is_newer_than(&self, other: &ModuleVersion) -> bool {
        self.precedence(other) == Ordering::Greater
    }
}

impl FromStr for ModuleVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.prerelease {
            write!(f, "-{}", tag)?;
        }
        if let Some(meta) = &self.build {
            write!(f, "+{}", meta)?;
        }
        Ok(())
    }
}

impl Default for ModuleVersion {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Snapshot of a module record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module name (entry-point type)
    pub name: String,
    pub version: ModuleVersion,
    /// Package location
    pub path: PathBuf,
    /// SHA-256 of the package file
    pub digest: String,
    /// Realm of the current load generation
    pub realm: RealmId,
    pub state: ModuleState,
    /// Types published to the shared realm
    pub exports: Vec<String>,
    /// Types expected from the shared realm
    pub requires: Vec<String>,
    /// Required names that did not resolve at load time
    pub missing_requirements: Vec<String>,
    /// Types contained in the package
    pub types: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    /// Successful reloads since the first load
    pub reload_count: u32,
    /// Whether a live instance is held
    pub instantiated: bool,
}

impl ModuleInfo {
    pub fn generation(&self) -> u64 {
        self.realm.generation
    }

    /// Whether every required name resolved
    pub fn is_satisfied(&self) -> bool {
        self.missing_requirements.is_empty()
    }
}
