//! Byte-providers consulted by a realm
//!
//! A provider maps a fully-qualified type name to the raw bytes of its
//! definition. Providers are composable: the instrumentation stage and the
//! export filter both decorate another provider.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use modhost_kernel::{PackageError, RealmError, TypeDescriptor, entry_of_type_name};
use parking_lot::RwLock;
use tracing::debug;

use super::{Realm, RealmId};
use crate::package::Package;

/// Source of type definition bytes.
pub trait BytesProvider: Send + Sync {
    /// Bytes of the named type, or `None` when this provider does not
    /// supply it
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError>;

    /// Realm on whose behalf this provider publishes types.
    ///
    /// Definitions produced through an owned provider are evicted when the
    /// owner is retired.
    fn owner(&self) -> Option<&RealmId> {
        None
    }

    /// Realm that resolves the references of the definitions produced here
    fn home(&self) -> Option<Arc<Realm>> {
        None
    }

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// In-memory snapshot of a package's type entries.
pub struct PackageProvider {
    path: PathBuf,
    entries: HashMap<String, Vec<u8>>,
}

impl PackageProvider {
    /// Snapshot all type entries of an opened package
    pub fn from_package(package: &mut Package) -> Result<Self, PackageError> {
        Ok(Self {
            path: package.path().to_path_buf(),
            entries: package.type_entries()?,
        })
    }

    /// Open a package file and snapshot it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PackageError> {
        let mut package = Package::open(path)?;
        Self::from_package(&mut package)
    }

    /// Names of the contained types
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BytesProvider for PackageProvider {
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError> {
        Ok(self.entries.get(name).cloned())
    }

    fn describe(&self) -> String {
        format!("package {}", self.path.display())
    }
}

/// Loose `.type` files under a root directory (`root/a/b/C.type`).
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl BytesProvider for DirectoryProvider {
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError> {
        let path = self.root.join(entry_of_type_name(name));
        if !path.is_file() {
            return Ok(None);
        }
        debug!("Reading {} from {:?}", name, path);
        Ok(Some(fs::read(&path)?))
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

enum MemoryEntry {
    Descriptor(TypeDescriptor),
    Raw(Vec<u8>),
}

/// Programmatically populated provider
#[derive(Default)]
pub struct MemoryProvider {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition
    pub fn with_type(self, descriptor: TypeDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Add raw bytes under a name
    pub fn with_raw(self, name: &str, bytes: &[u8]) -> Self {
        self.entries
            .write()
            .insert(name.to_string(), MemoryEntry::Raw(bytes.to_vec()));
        self
    }

    pub fn insert(&self, descriptor: TypeDescriptor) {
        self.entries
            .write()
            .insert(descriptor.name.clone(), MemoryEntry::Descriptor(descriptor));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }
}

impl BytesProvider for MemoryProvider {
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError> {
        match self.entries.read().get(name) {
            Some(MemoryEntry::Descriptor(descriptor)) => descriptor.to_bytes().map(Some),
            Some(MemoryEntry::Raw(bytes)) => Ok(Some(bytes.clone())),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        format!("memory ({} types)", self.entries.read().len())
    }
}

/// Publishes a module's exported types into the shared realm.
///
/// Only the listed names pass through; definitions produced here resolve
/// their own references through the exporting module's realm.
pub struct ExportFilter {
    owner: RealmId,
    names: HashSet<String>,
    inner: Arc<dyn BytesProvider>,
    home: Weak<Realm>,
}

impl ExportFilter {
    /// Create a new export filter
    pub fn new(
        owner: RealmId,
        names: impl IntoIterator<Item = String>,
        inner: Arc<dyn BytesProvider>,
        home: &Arc<Realm>,
    ) -> Self {
        Self {
            owner,
            names: names.into_iter().collect(),
            inner,
            home: Arc::downgrade(home),
        }
    }

    pub fn exports(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl BytesProvider for ExportFilter {
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError> {
        if !self.names.contains(name) {
            return Ok(None);
        }
        self.inner.provide(name)
    }

    fn owner(&self) -> Option<&RealmId> {
        Some(&self.owner)
    }

    fn home(&self) -> Option<Arc<Realm>> {
        self.home.upgrade()
    }

    fn describe(&self) -> String {
        format!(
            "exports of {} ({} names) over {}",
            self.owner,
            self.names.len(),
            self.inner.describe()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageBuilder;

    #[test]
    fn test_memory_provider() {
        let provider = MemoryProvider::new()
            .with_type(TypeDescriptor::class("demo.A"))
            .with_raw("demo.Broken", b"not = [toml");

        let bytes = provider.provide("demo.A").unwrap().unwrap();
        assert_eq!(
            TypeDescriptor::from_bytes("demo.A", &bytes).unwrap().name,
            "demo.A"
        );
        assert!(provider.provide("demo.B").unwrap().is_none());
        assert!(provider.provide("demo.Broken").unwrap().is_some());
        assert!(provider.remove("demo.A"));
        assert!(provider.provide("demo.A").unwrap().is_none());
    }

    #[test]
    fn test_directory_provider() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("demo/store");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join("Cache.type"),
            TypeDescriptor::class("demo.store.Cache").to_bytes().unwrap(),
        )
        .unwrap();

        let provider = DirectoryProvider::new(dir.path());
        assert!(provider.provide("demo.store.Cache").unwrap().is_some());
        assert!(provider.provide("demo.store.Missing").unwrap().is_none());
    }

    #[test]
    fn test_package_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.mpk");
        PackageBuilder::new("demo.Main")
            .with_type(TypeDescriptor::class("demo.Main"))
            .with_type(TypeDescriptor::class("demo.Helper"))
            .write_to(&path)
            .unwrap();

        let provider = PackageProvider::open(&path).unwrap();
        assert_eq!(provider.len(), 2);
        assert!(provider.provide("demo.Helper").unwrap().is_some());
        assert!(provider.provide("demo.Other").unwrap().is_none());
        assert!(provider.describe().contains("p.mpk"));
    }

    #[test]
    fn test_export_filter_passes_listed_names_only() {
        let home = Realm::new(RealmId::new("demo.Main", 1), None);
        let inner: Arc<dyn BytesProvider> = Arc::new(
            MemoryProvider::new()
                .with_type(TypeDescriptor::class("demo.Api"))
                .with_type(TypeDescriptor::class("demo.Internal")),
        );
        let filter = ExportFilter::new(
            home.id().clone(),
            vec!["demo.Api".to_string()],
            inner,
            &home,
        );

        assert!(filter.provide("demo.Api").unwrap().is_some());
        assert!(filter.provide("demo.Internal").unwrap().is_none());
        assert_eq!(filter.owner(), Some(home.id()));
        assert!(filter.home().is_some());

        drop(home);
        assert!(filter.home().is_none());
    }
}
