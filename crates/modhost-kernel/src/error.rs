//! Typed errors for the module runtime.
//!
//! Each subsystem owns one enum; [`ModuleError`] is the orchestrator-level
//! error and wraps the others.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening or inspecting a module package.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PackageError {
    /// The archive carries no `META-INF/MANIFEST.MF`.
    #[error("Package {path:?} has no manifest")]
    MissingManifest { path: PathBuf },

    /// The manifest does not declare `Plugin-Class`.
    #[error("Manifest of {path:?} does not declare Plugin-Class")]
    MissingEntryPoint { path: PathBuf },

    /// The manifest text could not be parsed.
    #[error("Malformed manifest: {0}")]
    Manifest(String),

    /// The archive itself is unreadable.
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Package I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving or defining a type inside a realm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RealmError {
    /// No parent and no byte-provider could supply the type.
    #[error("Type not found: {0}")]
    TypeNotFound(String),

    /// The bytes supplied for a type are not a valid definition.
    #[error("Invalid definition for {name}: {reason}")]
    Definition { name: String, reason: String },

    /// More than one field qualifies as the identifier field.
    #[error("Type {type_name} has more than one identifier field: {fields:?}")]
    AmbiguousIdentifierField {
        type_name: String,
        fields: Vec<String>,
    },

    /// The instrumentation stage could not rewrite a definition.
    #[error("Failed to rewrite {name}: {reason}")]
    Rewrite { name: String, reason: String },

    /// The realm that defined a type has been dropped.
    #[error("Realm {0} has been released")]
    RealmReleased(String),

    #[error("Realm I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the injection controller while building an object graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InjectError {
    /// The type carries no `[component]` declaration.
    #[error("{0} is not a component")]
    NotAComponent(String),

    /// The concrete component type declares no identifier field.
    #[error("Component {0} declares no identifier field")]
    MissingIdentifierField(String),

    /// The concrete component type declares several identifier fields.
    #[error("Component {type_name} declares more than one identifier field: {fields:?}")]
    AmbiguousIdentifierField {
        type_name: String,
        fields: Vec<String>,
    },

    /// A required contract has no registered implementation.
    #[error("No implementation of {contract} for required field {component}.{field}")]
    MissingImplementation {
        component: String,
        field: String,
        contract: String,
    },

    /// A required contract has several registered implementations.
    #[error(
        "Ambiguous implementations of {contract} for required field {component}.{field}: {candidates:?}"
    )]
    AmbiguousImplementation {
        component: String,
        field: String,
        contract: String,
        candidates: Vec<String>,
    },

    /// The type has no reachable default constructor.
    #[error("Cannot instantiate {type_name}: {reason}")]
    InstantiationFailed { type_name: String, reason: String },

    /// A resolved value is not assignable to the declared field type.
    #[error("Field {component}.{field} expects {expected}, got {actual}")]
    TypeMismatch {
        component: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Realm(#[from] RealmError),
}

/// Errors surfaced by the module lifecycle orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModuleError {
    /// No module record exists under the given name.
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// The module's entry point could not be instantiated.
    #[error("Cannot instantiate module {name}: {reason}")]
    InstantiationFailed { name: String, reason: String },

    /// The entry-point type does not satisfy the execution contract.
    #[error("Entry point {0} does not satisfy the execution contract")]
    NotExecutable(String),

    /// The entry point names a behavior that was never registered.
    #[error("Module {module} uses unregistered behavior {behavior}")]
    UnknownBehavior { module: String, behavior: String },

    /// The behavior ran and reported a failure.
    #[error("Module {module} failed during execute: {reason}")]
    Execution { module: String, reason: String },

    /// The change watcher could not be started.
    #[error("Watch error: {0}")]
    Watch(String),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Realm(#[from] RealmError),

    #[error(transparent)]
    Inject(#[from] InjectError),
}

/// Result type for orchestrator operations.
pub type ModuleResult<T> = Result<T, ModuleError>;
