//! Shared helpers for the `modhost-runtime` integration tests.
//!
//! Declared with `mod common;` in each test file that needs it.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use modhost_kernel::config::RuntimeConfig;
use modhost_kernel::{FieldDecl, ModuleError, ModuleListener, Scope, TypeDescriptor};
use modhost_runtime::{ModuleManager, PackageBuilder};
use parking_lot::Mutex;
use tempfile::TempDir;

/// A temporary package directory
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    /// Write a package into the directory
    pub fn write(&self, file: &str, builder: PackageBuilder) -> PathBuf {
        let path = self.path(file);
        builder.write_to(&path).expect("write package");
        path
    }

    /// Runtime configuration watching this directory
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig::new()
            .with_watch_dir(self.dir.path())
            .with_poll_interval(std::time::Duration::from_millis(20))
    }

    pub fn manager(&self) -> Arc<ModuleManager> {
        Arc::new(ModuleManager::new(self.config()))
    }
}

/// A component type with an identifier field
pub fn component(name: &str, scope: Scope) -> TypeDescriptor {
    TypeDescriptor::class(name)
        .with_component(scope)
        .with_field(FieldDecl::identifier("id"))
}

/// An executable entry-point component
pub fn entry(name: &str, scope: Scope) -> TypeDescriptor {
    component(name, scope).with_execute("describe")
}

/// Records every listener callback
#[derive(Default)]
pub struct Recorder {
    pub loaded: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    pub fn attach(manager: &ModuleManager) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        manager.add_listener(recorder.clone());
        recorder
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().clone()
    }
}

impl ModuleListener for Recorder {
    fn on_loaded(&self, name: &str) {
        self.loaded.lock().push(name.to_string());
    }

    fn on_removed(&self, name: &str) {
        self.removed.lock().push(name.to_string());
    }

    fn on_error(&self, name: &str, error: &ModuleError) {
        self.errors.lock().push((name.to_string(), error.to_string()));
    }
}
