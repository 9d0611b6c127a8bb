//! Module package inspection
//!
//! A package is a zip archive holding `META-INF/MANIFEST.MF` and one
//! `.type` entry per type definition. The manifest's `Plugin-Class`
//! attribute names the entry-point type; `Export` and `Require` list the
//! types published to, or expected from, the shared realm.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use modhost_kernel::{PackageError, TypeDescriptor, entry_of_type_name, type_name_of_entry};
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

/// Manifest location inside a package.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
/// Entry-point attribute.
pub const PLUGIN_CLASS: &str = "Plugin-Class";
/// Exported type list attribute.
pub const EXPORT: &str = "Export";
/// Required type list attribute.
pub const REQUIRE: &str = "Require";
/// Module version attribute.
pub const MODULE_VERSION: &str = "Module-Version";

/// Largest buffer reserved up front from an entry's declared size.
const MAX_SIZE_HINT: usize = 64 * 1024;

/// Initial buffer capacity for an entry declaring `declared` bytes
fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(usize::MAX).min(MAX_SIZE_HINT)
}

/// Main section of a package manifest.
///
/// Attribute names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    attributes: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse manifest text.
    ///
    /// Lines starting with a single space continue the previous value; the
    /// first blank line after an attribute ends the main section.
    pub fn parse(text: &str) -> Result<Self, PackageError> {
        let mut attributes = BTreeMap::new();
        let mut current: Option<(String, String)> = None;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');

            if let Some(rest) = line.strip_prefix(' ') {
                match current.as_mut() {
                    Some((_, value)) => value.push_str(rest),
                    None => {
                        return Err(PackageError::Manifest(format!(
                            "line {}: continuation without attribute",
                            number + 1
                        )));
                    }
                }
                continue;
            }

            if let Some((key, value)) = current.take() {
                attributes.insert(key, value);
            }

            if line.is_empty() {
                if attributes.is_empty() {
                    continue;
                }
                break;
            }

            let (key, value) = line.split_once(':').ok_or_else(|| {
                PackageError::Manifest(format!("line {}: missing ':'", number + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(PackageError::Manifest(format!(
                    "line {}: empty attribute name",
                    number + 1
                )));
            }
            current = Some((key.to_ascii_lowercase(), value.trim_start().to_string()));
        }

        if let Some((key, value)) = current.take() {
            attributes.insert(key, value);
        }

        Ok(Self { attributes })
    }

    /// Get an attribute value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(&key.to_ascii_lowercase())
            .map(|v| v.trim())
    }

    /// Entry-point type name, if declared and not blank
    pub fn entry_point(&self) -> Option<&str> {
        self.get(PLUGIN_CLASS).filter(|v| !v.is_empty())
    }

    /// Types published to the shared realm
    pub fn exports(&self) -> Vec<String> {
        self.list(EXPORT)
    }

    /// Types expected from the shared realm
    pub fn requires(&self) -> Vec<String> {
        self.list(REQUIRE)
    }

    /// Declared module version
    pub fn version(&self) -> Option<&str> {
        self.get(MODULE_VERSION)
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An opened module package.
///
/// The archive is read into memory on open, so the file on disk may be
/// replaced while the package is inspected.
pub struct Package {
    path: PathBuf,
    archive: ZipArchive<Cursor<Vec<u8>>>,
    manifest: Option<Manifest>,
    digest: String,
}

fn archive_error(e: ZipError) -> PackageError {
    PackageError::Archive(e.to_string())
}

impl Package {
    /// Open a package file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PackageError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_error)?;
        let manifest = match archive.by_name(MANIFEST_PATH) {
            Ok(mut entry) => {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                Some(Manifest::parse(&text)?)
            }
            Err(ZipError::FileNotFound) => None,
            Err(e) => return Err(archive_error(e)),
        };

        debug!("Opened package {:?} ({} entries)", path, archive.len());

        Ok(Self {
            path,
            archive,
            manifest,
            digest,
        })
    }

    /// Package location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 of the package file, hex encoded
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The parsed manifest
    pub fn manifest(&self) -> Result<&Manifest, PackageError> {
        self.manifest
            .as_ref()
            .ok_or_else(|| PackageError::MissingManifest {
                path: self.path.clone(),
            })
    }

    /// Entry-point type name from `Plugin-Class`
    pub fn entry_point(&self) -> Result<&str, PackageError> {
        self.manifest()?
            .entry_point()
            .ok_or_else(|| PackageError::MissingEntryPoint {
                path: self.path.clone(),
            })
    }

    /// Names of all types contained in the package.
    ///
    /// Lazily walks the archive directory; call again to restart.
    pub fn types(&self) -> impl Iterator<Item = String> + '_ {
        self.archive.file_names().filter_map(type_name_of_entry)
    }

    /// Raw definition bytes of one type
    pub fn read_type(&mut self, name: &str) -> Result<Option<Vec<u8>>, PackageError> {
        match self.archive.by_name(&entry_of_type_name(name)) {
            Ok(mut entry) => {
                let mut bytes = Vec::with_capacity(capacity_hint(entry.size()));
                entry.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(archive_error(e)),
        }
    }

    /// Definition bytes of every type in the package
    pub fn type_entries(&mut self) -> Result<HashMap<String, Vec<u8>>, PackageError> {
        let names: Vec<String> = self.types().collect();
        let mut entries = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(bytes) = self.read_type(&name)? {
                entries.insert(name, bytes);
            }
        }
        Ok(entries)
    }
}

/// Read the entry-point type name of a package file
pub fn entry_point_of<P: AsRef<Path>>(path: P) -> Result<String, PackageError> {
    Ok(Package::open(path)?.entry_point()?.to_string())
}

/// List the type names contained in a package file
pub fn enumerate_types<P: AsRef<Path>>(path: P) -> Result<Vec<String>, PackageError> {
    Ok(Package::open(path)?.types().collect())
}

/// Writes module packages.
pub struct PackageBuilder {
    attributes: Vec<(String, String)>,
    with_manifest: bool,
    types: Vec<TypeDescriptor>,
    raw_entries: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    /// Create a builder for a package with the given entry point
    pub fn new(entry_point: &str) -> Self {
        Self {
            attributes: vec![(PLUGIN_CLASS.to_string(), entry_point.to_string())],
            with_manifest: true,
            types: Vec::new(),
            raw_entries: Vec::new(),
        }
    }

    /// Create a builder whose manifest has no `Plugin-Class`
    pub fn without_entry_point() -> Self {
        Self {
            attributes: Vec::new(),
            ..Self::new("")
        }
    }

    /// Omit the manifest entirely
    pub fn without_manifest(mut self) -> Self {
        self.with_manifest = false;
        self
    }

    /// Add a manifest attribute
    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    /// Set `Export`
    pub fn exports(self, names: &[&str]) -> Self {
        self.attribute(EXPORT, &names.join(", "))
    }

    /// Set `Require`
    pub fn requires(self, names: &[&str]) -> Self {
        self.attribute(REQUIRE, &names.join(", "))
    }

    /// Set `Module-Version`
    pub fn version(self, version: &str) -> Self {
        self.attribute(MODULE_VERSION, version)
    }

    /// Add a type definition
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Add an arbitrary archive entry
    pub fn with_raw_entry(mut self, path: &str, bytes: &[u8]) -> Self {
        self.raw_entries.push((path.to_string(), bytes.to_vec()));
        self
    }

    /// Render the manifest text
    pub fn manifest_text(&self) -> String {
        let mut text = String::from("Manifest-Version: 1.0\r\n");
        for (key, value) in &self.attributes {
            text.push_str(&format!("{}: {}\r\n", key, value));
        }
        text.push_str("\r\n");
        text
    }

    /// Encode the package
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        if self.with_manifest {
            writer
                .start_file(MANIFEST_PATH, options)
                .map_err(archive_error)?;
            writer.write_all(self.manifest_text().as_bytes())?;
        }

        for descriptor in &self.types {
            let bytes = descriptor
                .to_bytes()
                .map_err(|e| PackageError::Archive(e.to_string()))?;
            writer
                .start_file(entry_of_type_name(&descriptor.name), options)
                .map_err(archive_error)?;
            writer.write_all(&bytes)?;
        }

        for (path, bytes) in &self.raw_entries {
            writer
                .start_file(path.as_str(), options)
                .map_err(archive_error)?;
            writer.write_all(bytes)?;
        }

        Ok(writer.finish().map_err(archive_error)?.into_inner())
    }

    /// Write the package to `path`.
    ///
    /// The archive is written next to the target with a `.tmp` suffix and
    /// renamed into place, so a watcher never observes a partial file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), PackageError> {
        let path = path.as_ref();
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, self.to_bytes()?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}
