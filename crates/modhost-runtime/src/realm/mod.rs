//! Loading realms
//!
//! A realm is an isolated type namespace. Each loaded module gets a fresh
//! realm per load generation; all module realms share one parent, the
//! shared realm, which holds the types modules export to each other.
//!
//! Resolution order for a name:
//! 1. a definition this realm already holds
//! 2. the parent realm
//! 3. this realm's byte-providers, in the order they were added

mod provider;

pub use provider::{BytesProvider, DirectoryProvider, ExportFilter, MemoryProvider, PackageProvider};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use modhost_kernel::{RealmError, TypeDescriptor};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Module name of the shared realm's identity.
pub const SHARED_REALM: &str = "<shared>";

/// Identity of a realm: module name plus load generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RealmId {
    pub module: String,
    pub generation: u64,
}

impl RealmId {
    pub fn new(module: &str, generation: u64) -> Self {
        Self {
            module: module.to_string(),
            generation,
        }
    }

    /// Identity of the shared realm
    pub fn shared() -> Self {
        Self::new(SHARED_REALM, 0)
    }

    pub fn is_shared(&self) -> bool {
        self.module == SHARED_REALM
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.module, self.generation)
    }
}

/// A type defined by a realm.
pub struct TypeDefinition {
    descriptor: TypeDescriptor,
    realm: RealmId,
    origin: Option<RealmId>,
    home: Weak<Realm>,
}

impl TypeDefinition {
    /// Fully-qualified name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Identity of the defining realm
    pub fn realm_id(&self) -> &RealmId {
        &self.realm
    }

    /// Module that published this definition into the shared realm
    pub fn origin(&self) -> Option<&RealmId> {
        self.origin.as_ref()
    }

    /// Whether the definition was contributed by the given realm
    pub fn belongs_to(&self, id: &RealmId) -> bool {
        self.realm == *id || self.origin.as_ref() == Some(id)
    }

    /// Whether both handles denote the same definition
    pub fn same(&self, other: &TypeDefinition) -> bool {
        self.realm == other.realm && self.name() == other.name()
    }

    /// Realm used to resolve the names this definition references
    pub fn realm(&self) -> Result<Arc<Realm>, RealmError> {
        self.home
            .upgrade()
            .ok_or_else(|| RealmError::RealmReleased(self.realm.to_string()))
    }

    /// Resolve a referenced type name
    pub fn resolve(&self, name: &str) -> Result<Arc<TypeDefinition>, RealmError> {
        self.realm()?.resolve(name)
    }

    /// Direct super type
    pub fn superclass(&self) -> Result<Option<Arc<TypeDefinition>>, RealmError> {
        match &self.descriptor.extends {
            Some(parent) => self.resolve(parent).map(Some),
            None => Ok(None),
        }
    }

    /// Super type chain, nearest first
    pub fn ancestors(&self) -> Result<Vec<Arc<TypeDefinition>>, RealmError> {
        let mut chain: Vec<Arc<TypeDefinition>> = Vec::new();
        let mut current = self.superclass()?;
        while let Some(ty) = current {
            if ty.same(self) || chain.iter().any(|seen| seen.same(&ty)) {
                return Err(RealmError::Definition {
                    name: self.name().to_string(),
                    reason: format!("inheritance cycle through {}", ty.name()),
                });
            }
            current = ty.superclass()?;
            chain.push(ty);
        }
        Ok(chain)
    }

    /// All super types and implemented contracts, transitively
    pub fn supertypes(&self) -> Result<Vec<Arc<TypeDefinition>>, RealmError> {
        let mut seen: HashSet<(RealmId, String)> = HashSet::new();
        let mut result = Vec::new();
        let mut queue: VecDeque<(Arc<Realm>, String)> = VecDeque::new();

        let realm = self.realm()?;
        for name in self.direct_supertype_names() {
            queue.push_back((realm.clone(), name));
        }

        while let Some((realm, name)) = queue.pop_front() {
            let ty = realm.resolve(&name)?;
            if ty.same(self) || !seen.insert((ty.realm.clone(), name)) {
                continue;
            }
            let next = ty.realm()?;
            for parent in ty.direct_supertype_names() {
                queue.push_back((next.clone(), parent));
            }
            result.push(ty);
        }
        Ok(result)
    }

    fn direct_supertype_names(&self) -> Vec<String> {
        self.descriptor
            .extends
            .iter()
            .chain(self.descriptor.implements.iter())
            .cloned()
            .collect()
    }

    /// Whether values of this type may be stored where `target` is expected
    pub fn is_assignable_to(&self, target: &TypeDefinition) -> Result<bool, RealmError> {
        if self.same(target) {
            return Ok(true);
        }
        Ok(self.supertypes()?.iter().any(|ty| ty.same(target)))
    }

    /// Behavior implementing `execute()`, declared here or inherited
    pub fn execution_behavior(&self) -> Result<Option<String>, RealmError> {
        if let Some(behavior) = &self.descriptor.execute {
            return Ok(Some(behavior.clone()));
        }
        Ok(self
            .ancestors()?
            .iter()
            .find_map(|ty| ty.descriptor.execute.clone()))
    }
}

impl fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("name", &self.name())
            .field("realm", &self.realm)
            .field("origin", &self.origin)
            .finish()
    }
}

/// An isolated type namespace.
pub struct Realm {
    id: RealmId,
    parent: Option<Arc<Realm>>,
    providers: RwLock<Vec<Arc<dyn BytesProvider>>>,
    defined: RwLock<HashMap<String, Arc<TypeDefinition>>>,
    // Serializes provider consultation with definition.
    define_lock: Mutex<()>,
    self_ref: Weak<Realm>,
}

impl Realm {
    /// Create a new realm
    pub fn new(id: RealmId, parent: Option<Arc<Realm>>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            parent,
            providers: RwLock::new(Vec::new()),
            defined: RwLock::new(HashMap::new()),
            define_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    /// Create the shared realm
    pub fn shared() -> Arc<Self> {
        Self::new(RealmId::shared(), None)
    }

    pub fn id(&self) -> &RealmId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Arc<Realm>> {
        self.parent.as_ref()
    }

    /// Append a byte-provider
    pub fn add_provider(&self, provider: Arc<dyn BytesProvider>) {
        debug!("Realm {} consults {}", self.id, provider.describe());
        self.providers.write().push(provider);
    }

    pub fn provider_count(&self) -> usize {
        self.providers.read().len()
    }

    /// Definition already held by this realm
    pub fn defined(&self, name: &str) -> Option<Arc<TypeDefinition>> {
        self.defined.read().get(name).cloned()
    }

    /// Names of the definitions held by this realm
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.defined.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a type name
    pub fn resolve(&self, name: &str) -> Result<Arc<TypeDefinition>, RealmError> {
        self.find(name)?
            .ok_or_else(|| RealmError::TypeNotFound(name.to_string()))
    }

    /// Resolve a type name, `None` when nothing supplies it
    pub fn find(&self, name: &str) -> Result<Option<Arc<TypeDefinition>>, RealmError> {
        if let Some(def) = self.defined(name) {
            return Ok(Some(def));
        }

        if let Some(parent) = &self.parent {
            if let Some(def) = parent.find(name)? {
                return Ok(Some(def));
            }
        }

        let _guard = self.define_lock.lock();
        if let Some(def) = self.defined(name) {
            return Ok(Some(def));
        }

        let providers = self.providers.read().clone();
        for provider in providers {
            let Some(bytes) = provider.provide(name)? else {
                continue;
            };
            let descriptor = TypeDescriptor::from_bytes(name, &bytes)?;
            let home = provider
                .home()
                .map(|realm| Arc::downgrade(&realm))
                .unwrap_or_else(|| self.self_ref.clone());
            let def = Arc::new(TypeDefinition {
                descriptor,
                realm: self.id.clone(),
                origin: provider.owner().cloned(),
                home,
            });
            self.defined.write().insert(name.to_string(), def.clone());
            debug!("Realm {} defined {} from {}", self.id, name, provider.describe());
            return Ok(Some(def));
        }

        Ok(None)
    }

    /// Retire everything a realm contributed here.
    ///
    /// Removes the providers it owns and evicts the definitions it
    /// published. Returns the number of evicted definitions.
    pub fn release(&self, owner: &RealmId) -> usize {
        let evicted = self.detach(owner).definition_count();
        if evicted > 0 {
            info!("Realm {} evicted {} definitions of {}", self.id, evicted, owner);
        }
        evicted
    }

    /// Take out the providers and definitions a realm contributed here,
    /// keeping them for [`Realm::reattach`]
    pub fn detach(&self, owner: &RealmId) -> Detached {
        let _guard = self.define_lock.lock();
        let mut providers = Vec::new();
        self.providers.write().retain(|p| {
            let owned = p.owner() == Some(owner);
            if owned {
                providers.push(p.clone());
            }
            !owned
        });

        let mut defined = self.defined.write();
        let names: Vec<String> = defined
            .iter()
            .filter(|(_, def)| def.belongs_to(owner))
            .map(|(name, _)| name.clone())
            .collect();
        let definitions = names
            .into_iter()
            .filter_map(|name| defined.remove(&name))
            .collect();

        Detached {
            owner: owner.clone(),
            providers,
            definitions,
        }
    }

    /// Put detached providers and definitions back.
    ///
    /// A name defined again since the detach keeps its current definition.
    /// Returns the number of definitions restored.
    pub fn reattach(&self, detached: Detached) -> usize {
        let _guard = self.define_lock.lock();
        self.providers.write().extend(detached.providers);

        let mut defined = self.defined.write();
        let mut restored = 0;
        for def in detached.definitions {
            if !defined.contains_key(def.name()) {
                defined.insert(def.name().to_string(), def);
                restored += 1;
            }
        }
        debug!("Realm {} restored {} definitions of {}", self.id, restored, detached.owner);
        restored
    }
}

/// Providers and definitions taken out of a realm by [`Realm::detach`]
#[must_use]
pub struct Detached {
    owner: RealmId,
    providers: Vec<Arc<dyn BytesProvider>>,
    definitions: Vec<Arc<TypeDefinition>>,
}

impl Detached {
    pub fn owner(&self) -> &RealmId {
        &self.owner
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id.clone()))
            .field("defined", &self.defined.read().len())
            .finish()
    }
}
