//! Module lifecycle manager
//!
//! Coordinates package loading, reloading, unloading and watching. Each
//! (re)load builds a fresh realm under the shared realm; replacing or
//! removing a module retires everything its previous realm contributed to
//! the shared realm and to the injection controller. While a replacement
//! builds, the previous generation's contributions are held aside and put
//! back if the build fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use modhost_kernel::config::RuntimeConfig;
use modhost_kernel::{
    InjectError, LoadReport, ModuleError, ModuleEvent, ModuleListener, ModuleResult, ModuleState,
    PackageError, TypeKind,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::behavior::BehaviorRegistry;
use crate::inject::{DetachedSingletons, Injector};
use crate::instrument::InstrumentingProvider;
use crate::object::ObjectRef;
use crate::package::{Package, entry_point_of};
use crate::realm::{BytesProvider, Detached, ExportFilter, PackageProvider, Realm, RealmId, TypeDefinition};
use crate::registry::{ModuleInfo, ModuleVersion};
use crate::watcher::{
    ChangeWatcher, ListenerResult, WatchConfig, WatchEvent, WatchEventKind, WatchListener,
};

/// A loaded generation's contributions, taken out while its replacement
/// builds
struct Suspended {
    realm_id: RealmId,
    realm: Option<Arc<Realm>>,
    types: Vec<String>,
    definitions: Detached,
    singletons: DetachedSingletons,
}

/// Loaded module entry
struct ModuleRecord {
    name: String,
    path: PathBuf,
    digest: String,
    version: ModuleVersion,
    realm_id: RealmId,
    realm: Option<Arc<Realm>>,
    entry: Option<Arc<TypeDefinition>>,
    instance: Option<ObjectRef>,
    exports: Vec<String>,
    requires: Vec<String>,
    missing_requirements: Vec<String>,
    types: Vec<String>,
    loaded_at: DateTime<Utc>,
    reload_count: u32,
}

impl ModuleRecord {
    fn info(&self, state: ModuleState) -> ModuleInfo {
        ModuleInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            path: self.path.clone(),
            digest: self.digest.clone(),
            realm: self.realm_id.clone(),
            state,
            exports: self.exports.clone(),
            requires: self.requires.clone(),
            missing_requirements: self.missing_requirements.clone(),
            types: self.types.clone(),
            loaded_at: self.loaded_at,
            reload_count: self.reload_count,
            instantiated: self.instance.is_some(),
        }
    }
}

/// Module lifecycle manager
pub struct ModuleManager {
    config: RuntimeConfig,
    shared: Arc<Realm>,
    injector: Arc<Injector>,
    behaviors: Arc<BehaviorRegistry>,
    modules: RwLock<HashMap<String, ModuleRecord>>,
    states: RwLock<HashMap<String, ModuleState>>,
    listeners: RwLock<Vec<Arc<dyn ModuleListener>>>,
    event_tx: broadcast::Sender<ModuleEvent>,
    generation: AtomicU64,
    watcher: Mutex<Option<Arc<ChangeWatcher>>>,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new(config: RuntimeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            shared: Realm::shared(),
            injector: Arc::new(Injector::new()),
            behaviors: Arc::new(BehaviorRegistry::new()),
            modules: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            event_tx,
            generation: AtomicU64::new(0),
            watcher: Mutex::new(None),
            config,
        }
    }

    /// Use a prepared behavior registry
    pub fn with_behaviors(mut self, behaviors: Arc<BehaviorRegistry>) -> Self {
        self.behaviors = behaviors;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to module events
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.event_tx.subscribe()
    }

    /// Add a lifecycle listener
    pub fn add_listener(&self, listener: Arc<dyn ModuleListener>) {
        self.listeners.write().push(listener);
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn shared_realm(&self) -> &Arc<Realm> {
        &self.shared
    }

    pub fn behaviors(&self) -> &Arc<BehaviorRegistry> {
        &self.behaviors
    }

    /// Load a package under the name of its entry point.
    ///
    /// Manifest failures are reported under the package path.
    pub fn load_package<P: AsRef<Path>>(&self, path: P) -> LoadReport {
        let path = path.as_ref();
        let started = Instant::now();

        match entry_point_of(path) {
            Ok(name) => self.reload(&name, path),
            Err(e) => {
                let key = path.display().to_string();
                let err = ModuleError::from(e);
                error!("Cannot load package {:?}: {}", path, err);
                self.notify_error(&key, &err);
                LoadReport::failed(&key, path.to_path_buf(), &err, started.elapsed())
            }
        }
    }

    /// Load every package in a directory, in file name order
    pub fn load_directory<P: AsRef<Path>>(&self, dir: P) -> ModuleResult<Vec<LoadReport>> {
        let watch = WatchConfig::from_runtime(&self.config);
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())
            .map_err(|e| ModuleError::from(PackageError::from(e)))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && watch.should_watch(path))
            .collect();
        paths.sort();

        Ok(paths.iter().map(|path| self.load_package(path)).collect())
    }

    /// (Re)load a module from a package.
    ///
    /// On success the record is created or replaced; on failure an existing
    /// record stays in place and listeners receive `on_error`.
    pub fn reload<P: AsRef<Path>>(&self, name: &str, path: P) -> LoadReport {
        let path = path.as_ref().to_path_buf();
        let started = Instant::now();

        let previous = self
            .modules
            .read()
            .get(name)
            .map(|r| {
                let realm = r.realm.clone();
                (r.realm_id.clone(), r.version.clone(), r.reload_count, realm, r.types.clone())
            });
        self.set_state(
            name,
            if previous.is_some() {
                ModuleState::Reloading
            } else {
                ModuleState::Loading
            },
        );
        info!("Loading module {} from {:?}", name, path);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let id = RealmId::new(name, generation);

        let mut suspended = None;
        let outcome = Package::open(&path)
            .map_err(ModuleError::from)
            .and_then(|package| {
                if let Some((old_id, _, _, realm, types)) = &previous {
                    suspended = Some(self.suspend(old_id, realm.clone(), types.clone()));
                }
                self.build_record(name, &id, package)
            });

        match outcome {
            Ok(mut record) => {
                if let Some(old) = suspended {
                    debug!(
                        "Retired {}: {} shared definitions, {} singletons",
                        old.realm_id,
                        old.definitions.definition_count(),
                        old.singletons.len()
                    );
                }
                if let Some((_, old_version, count, _, _)) = &previous {
                    record.reload_count = count + 1;
                    if record.version.is_newer_than(old_version) {
                        info!("Module {} upgraded {} -> {}", name, old_version, record.version);
                    }
                }
                self.modules.write().insert(name.to_string(), record);
                self.set_state(name, ModuleState::Loaded);

                let duration = started.elapsed();
                info!("Module {} loaded as {} in {:?}", name, id, duration);
                let _ = self.event_tx.send(ModuleEvent::Loaded {
                    name: name.to_string(),
                    path: path.clone(),
                    generation,
                    duration,
                });
                for listener in self.listener_snapshot() {
                    listener.on_loaded(name);
                }
                LoadReport::loaded(name, path, generation, duration)
            }
            Err(err) => {
                self.retire(&id);
                if let Some(old) = suspended {
                    self.resume(old);
                }
                let state = if self.modules.read().contains_key(name) {
                    ModuleState::Loaded
                } else {
                    ModuleState::Failed(err.to_string())
                };
                self.set_state(name, state);

                error!("Failed to load module {}: {}", name, err);
                self.notify_error(name, &err);
                LoadReport::failed(name, path, &err, started.elapsed())
            }
        }
    }

    fn build_record(
        &self,
        name: &str,
        id: &RealmId,
        mut package: Package,
    ) -> ModuleResult<ModuleRecord> {
        let manifest = package.manifest()?.clone();
        let exports = manifest.exports();
        let requires = manifest.requires();
        let types: Vec<String> = package.types().collect();

        let realm = Realm::new(id.clone(), Some(self.shared.clone()));
        let snapshot: Arc<dyn BytesProvider> = Arc::new(PackageProvider::from_package(&mut package)?);
        let provider: Arc<dyn BytesProvider> = Arc::new(
            InstrumentingProvider::new(snapshot).with_skip_prefixes(self.config.skip_prefixes.clone()),
        );
        realm.add_provider(provider.clone());

        if !exports.is_empty() {
            debug!("Module {} exports {:?}", name, exports);
            self.shared.add_provider(Arc::new(ExportFilter::new(
                id.clone(),
                exports.clone(),
                provider,
                &realm,
            )));
        }

        let entry = realm.resolve(name)?;
        Self::check_contract(&entry)?;

        self.injector.register_implementations(&realm, &types);

        let mut missing_requirements = Vec::new();
        for required in &requires {
            match realm.find(required) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!("Module {} requires {} which nothing provides", name, required);
                    missing_requirements.push(required.clone());
                }
                Err(e) => {
                    warn!("Module {} requires {}: {}", name, required, e);
                    missing_requirements.push(required.clone());
                }
            }
        }

        Ok(ModuleRecord {
            name: name.to_string(),
            path: package.path().to_path_buf(),
            digest: package.digest().to_string(),
            version: ModuleVersion::from_manifest(manifest.version()),
            realm_id: id.clone(),
            realm: Some(realm),
            entry: Some(entry),
            instance: None,
            exports,
            requires,
            missing_requirements,
            types,
            loaded_at: Utc::now(),
            reload_count: 0,
        })
    }

    /// Concrete, constructible, with an `execute` behavior
    fn check_contract(entry: &TypeDefinition) -> ModuleResult<()> {
        let descriptor = entry.descriptor();
        let executable = descriptor.kind == TypeKind::Class
            && descriptor.constructor
            && entry.execution_behavior()?.is_some();
        if executable {
            Ok(())
        } else {
            Err(ModuleError::NotExecutable(entry.name().to_string()))
        }
    }

    /// Take a generation's shared definitions, singletons and
    /// implementations out of circulation without dropping them
    fn suspend(&self, id: &RealmId, realm: Option<Arc<Realm>>, types: Vec<String>) -> Suspended {
        Suspended {
            realm_id: id.clone(),
            realm,
            types,
            definitions: self.shared.detach(id),
            singletons: self.injector.detach_realm(id),
        }
    }

    /// Put a suspended generation back in service
    fn resume(&self, suspended: Suspended) {
        let definitions = self.shared.reattach(suspended.definitions);
        let singletons = self.injector.reattach_singletons(suspended.singletons);
        let implementations = match &suspended.realm {
            Some(realm) => self.injector.register_implementations(realm, &suspended.types),
            None => 0,
        };
        info!(
            "Restored {}: {} shared definitions, {} singletons, {} implementations",
            suspended.realm_id, definitions, singletons, implementations
        );
    }

    fn retire(&self, id: &RealmId) {
        let definitions = self.shared.release(id);
        let singletons = self.injector.release_realm(id);
        debug!(
            "Retired {}: {} shared definitions, {} singletons",
            id, definitions, singletons
        );
    }

    /// Unload a module
    pub fn unload(&self, name: &str) -> ModuleResult<()> {
        let Some(mut record) = self.modules.write().remove(name) else {
            return Err(ModuleError::UnknownModule(name.to_string()));
        };
        self.set_state(name, ModuleState::Unloading);
        info!("Unloading module {}", name);

        self.retire(&record.realm_id);
        record.instance = None;
        record.entry = None;
        record.realm = None;

        let _ = self.event_tx.send(ModuleEvent::Removed {
            name: name.to_string(),
        });
        for listener in self.listener_snapshot() {
            listener.on_removed(name);
        }

        self.set_state(name, ModuleState::Unloaded);
        Ok(())
    }

    /// Unload every module and stop watching
    pub fn shutdown(&self) {
        self.stop_watching();
        let names: Vec<String> = self.modules.read().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.unload(&name) {
                warn!("Failed to unload module {}: {}", name, e);
            }
        }
    }

    /// Instantiate the entry point of a module and keep it as the live
    /// instance
    pub fn instantiate(&self, name: &str) -> ModuleResult<ObjectRef> {
        let entry = self.entry_point(name)?;
        let instance = self.injector.obtain(&entry).map_err(|e| match e {
            InjectError::InstantiationFailed { reason, .. } => ModuleError::InstantiationFailed {
                name: name.to_string(),
                reason,
            },
            other => ModuleError::from(other),
        })?;

        if let Some(record) = self.modules.write().get_mut(name) {
            record.instance = Some(instance.clone());
        }
        debug!("Instantiated module {}", name);
        Ok(instance)
    }

    /// Run the execution contract on a fresh instance
    pub fn execute(&self, name: &str) -> ModuleResult<String> {
        let entry = self.entry_point(name)?;
        let behavior_name = entry
            .execution_behavior()?
            .ok_or_else(|| ModuleError::NotExecutable(name.to_string()))?;
        let behavior =
            self.behaviors
                .get(&behavior_name)
                .ok_or_else(|| ModuleError::UnknownBehavior {
                    module: name.to_string(),
                    behavior: behavior_name.clone(),
                })?;

        let instance = self.instantiate(name)?;
        behavior
            .execute(&instance)
            .map_err(|e| ModuleError::Execution {
                module: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Resolved entry-point type of a loaded module
    pub fn entry_point(&self, name: &str) -> ModuleResult<Arc<TypeDefinition>> {
        self.modules
            .read()
            .get(name)
            .and_then(|r| r.entry.clone())
            .ok_or_else(|| ModuleError::UnknownModule(name.to_string()))
    }

    /// Realm of a loaded module
    pub fn realm(&self, name: &str) -> Option<Arc<Realm>> {
        self.modules.read().get(name).and_then(|r| r.realm.clone())
    }

    /// Live instance of a module, if instantiated
    pub fn instance(&self, name: &str) -> Option<ObjectRef> {
        self.modules.read().get(name).and_then(|r| r.instance.clone())
    }

    /// Snapshots of all loaded modules, sorted by name
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let modules = self.modules.read();
        let mut infos: Vec<ModuleInfo> = modules
            .values()
            .map(|r| r.info(self.state(&r.name)))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Snapshot of one module
    pub fn module(&self, name: &str) -> Option<ModuleInfo> {
        let modules = self.modules.read();
        modules.get(name).map(|r| r.info(self.state(name)))
    }

    /// Name of the module loaded from a package path
    pub fn module_by_path<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        let path = path.as_ref();
        self.modules
            .read()
            .values()
            .find(|r| r.path == path)
            .map(|r| r.name.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// Lifecycle state of a name
    pub fn state(&self, name: &str) -> ModuleState {
        self.states.read().get(name).cloned().unwrap_or_default()
    }

    fn set_state(&self, name: &str, state: ModuleState) {
        debug!("Module {} -> {}", name, state);
        self.states.write().insert(name.to_string(), state);
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn ModuleListener>> {
        self.listeners.read().clone()
    }

    fn notify_error(&self, name: &str, err: &ModuleError) {
        let _ = self.event_tx.send(ModuleEvent::Failed {
            name: name.to_string(),
            error: err.to_string(),
        });
        for listener in self.listener_snapshot() {
            listener.on_error(name, err);
        }
    }

    /// React to one watch event.
    ///
    /// Created loads the package; Modified unloads the module loaded from
    /// that path, then loads the package again; Deleted unloads it.
    pub fn handle_watch_event(&self, event: &WatchEvent) -> ModuleResult<()> {
        debug!("Watch event {:?} {:?}", event.kind, event.path);
        match event.kind {
            WatchEventKind::Created => {
                let _ = self.event_tx.send(ModuleEvent::PackageDiscovered {
                    path: event.path.clone(),
                });
                self.load_package(&event.path);
            }
            WatchEventKind::Modified => {
                if let Some(name) = self.module_by_path(&event.path) {
                    self.unload(&name)?;
                }
                self.load_package(&event.path);
            }
            WatchEventKind::Deleted => {
                if let Some(name) = self.module_by_path(&event.path) {
                    self.unload(&name)?;
                }
            }
        }
        Ok(())
    }

    /// Watch listener that forwards events to this manager
    pub fn watch_listener(self: &Arc<Self>) -> Arc<dyn WatchListener> {
        Arc::new(WatchBridge {
            manager: Arc::downgrade(self),
        })
    }

    /// Start polling the configured directory.
    ///
    /// Packages already loaded are tracked up front, so only changes to them
    /// produce events.
    pub fn start_watching(self: &Arc<Self>) -> ModuleResult<Arc<ChangeWatcher>> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Err(ModuleError::Watch("already watching".to_string()));
        }

        let watcher = Arc::new(ChangeWatcher::new(WatchConfig::from_runtime(&self.config)));
        for record in self.modules.read().values() {
            watcher.track(&record.path);
        }
        watcher.subscribe(self.watch_listener());
        watcher.start()?;

        *slot = Some(watcher.clone());
        Ok(watcher)
    }

    /// Stop polling
    pub fn stop_watching(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

struct WatchBridge {
    manager: Weak<ModuleManager>,
}

impl WatchListener for WatchBridge {
    fn on_watch_event(&self, event: &WatchEvent) -> ListenerResult {
        match self.manager.upgrade() {
            Some(manager) => manager.handle_watch_event(event).map_err(Into::into),
            None => Ok(()),
        }
    }
}
