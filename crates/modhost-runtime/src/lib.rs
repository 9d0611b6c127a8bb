//! Modhost Runtime
//!
//! Hot-swappable module runtime:
//! - [`package`]: module package inspection and building
//! - [`realm`]: isolated per-module type namespaces with a shared parent
//! - [`instrument`]: construction-plan rewriting of type definitions
//! - [`inject`]: the dependency-injection controller
//! - [`watcher`]: polling change detection over the package directory
//! - [`manager`]: module lifecycle orchestration

pub mod behavior;
pub mod inject;
pub mod instrument;
pub mod manager;
pub mod object;
pub mod package;
pub mod realm;
pub mod registry;
pub mod watcher;

pub use behavior::{Behavior, BehaviorRegistry, DESCRIBE_BEHAVIOR};
pub use inject::{ComponentFactory, DetachedSingletons, InjectionPoint, Injector};
pub use instrument::InstrumentingProvider;
pub use manager::ModuleManager;
pub use object::{Object, ObjectRef, Value};
pub use package::{Manifest, Package, PackageBuilder, entry_point_of, enumerate_types};
pub use realm::{
    BytesProvider, Detached, DirectoryProvider, ExportFilter, MemoryProvider, PackageProvider, Realm,
    RealmId, TypeDefinition,
};
pub use registry::{ModuleInfo, ModuleVersion, VersionError};
pub use watcher::{ChangeWatcher, ListenerResult, WatchConfig, WatchEvent, WatchEventKind, WatchListener};

pub use modhost_kernel::{
    InjectError, LoadReport, ModuleError, ModuleEvent, ModuleListener, ModuleResult, ModuleState,
    PackageError, RealmError, Scope, TypeDescriptor,
};
