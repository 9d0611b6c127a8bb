//! Dependency-injection controller
//!
//! Builds object graphs for component types. Every instance passes through
//! [`Injector::initialize`] exactly once: the singleton registry is
//! consulted, declared dependencies are resolved field by field, and the
//! identifier field receives the next process-unique value.
//!
//! Singletons are keyed by definition identity, so two realms that each
//! define a type of the same name get one instance apiece. Construction of
//! singletons is serialized: other threads never see a singleton whose
//! fields are still being injected. Circular singleton dependencies are not
//! detected; within the constructing thread the other party of a cycle
//! observes the first one partially initialized.

mod factory;
mod index;
mod slot;

pub use factory::{ComponentFactory, InjectionPoint};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use modhost_kernel::{Construction, InjectError, Scope, is_builtin_type};
use tracing::{debug, info, warn};

use crate::object::{Object, ObjectRef, Value};
use crate::realm::{Realm, RealmId, TypeDefinition};
use index::ImplementationIndex;
use slot::{SingletonKey, SingletonRegistry, key_of};

/// Deepest dependency chain followed before giving up.
pub const MAX_DEPTH: usize = 64;

/// The injection controller.
pub struct Injector {
    singletons: SingletonRegistry,
    factories: DashMap<(RealmId, String), Arc<ComponentFactory>>,
    implementations: ImplementationIndex,
    next_id: AtomicI64,
}

/// Singletons taken out of the registry with [`Injector::detach_realm`]
#[must_use]
pub struct DetachedSingletons {
    instances: Vec<(SingletonKey, ObjectRef)>,
}

impl DetachedSingletons {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Injector {
    /// Create a new injection controller
    pub fn new() -> Self {
        Self {
            singletons: SingletonRegistry::default(),
            factories: DashMap::new(),
            implementations: ImplementationIndex::default(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Allocate the next identifier value
    pub fn next_identifier(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Last identifier handed out, 0 if none
    pub fn last_identifier(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    /// Injection plan of a component type, built on first use
    pub fn factory(&self, ty: &Arc<TypeDefinition>) -> Result<Arc<ComponentFactory>, InjectError> {
        let key = (ty.realm_id().clone(), ty.name().to_string());
        if let Some(factory) = self.factories.get(&key) {
            return Ok(factory.clone());
        }
        let factory = Arc::new(ComponentFactory::build(ty)?);
        Ok(self.factories.entry(key).or_insert(factory).clone())
    }

    /// Populate a component instance.
    ///
    /// Returns the instance unchanged when it was already initialized. For a
    /// singleton whose definition is already registered, the registered
    /// instance is returned instead. A failed initialization leaves the
    /// instance uninitialized, so it can be retried.
    pub fn initialize(&self, instance: ObjectRef) -> Result<ObjectRef, InjectError> {
        self.initialize_at(instance, 0)
    }

    /// Create an instance through the default constructor and the
    /// construction plan of its type
    pub fn construct(&self, ty: &Arc<TypeDefinition>) -> Result<ObjectRef, InjectError> {
        self.construct_at(ty, 0)
    }

    /// Instance of a type as client code would obtain it: singletons through
    /// the registry, everything else freshly constructed
    pub fn obtain(&self, ty: &Arc<TypeDefinition>) -> Result<ObjectRef, InjectError> {
        self.obtain_at(ty, 0)
    }

    /// Fetch-or-create the singleton instance of a component type
    pub fn singleton(&self, ty: &Arc<TypeDefinition>) -> Result<ObjectRef, InjectError> {
        self.singleton_at(ty, 0)
    }

    /// Index the concrete types among `names` under their contracts.
    ///
    /// Names that do not resolve in `realm` are skipped.
    pub fn register_implementations<I>(&self, realm: &Realm, names: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut registered = 0;
        for name in names {
            let name = name.as_ref();
            let outcome = realm
                .resolve(name)
                .and_then(|ty| self.implementations.register(&ty));
            match outcome {
                Ok(0) => {}
                Ok(_) => registered += 1,
                Err(e) => warn!("Skipping implementation {} in {}: {}", name, realm.id(), e),
            }
        }
        debug!("Realm {} registered {} implementations", realm.id(), registered);
        registered
    }

    /// Registered implementations of `contract` visible from `realm`
    pub fn implementations_of(
        &self,
        contract: &TypeDefinition,
        realm: &Realm,
    ) -> Result<Vec<Arc<TypeDefinition>>, InjectError> {
        Ok(self.implementations.candidates(contract, realm)?)
    }

    /// Contracts with at least one registered implementation
    pub fn contracts(&self) -> Vec<String> {
        self.implementations.contracts()
    }

    /// Registered singleton of a type definition
    pub fn registered(&self, ty: &TypeDefinition) -> Option<ObjectRef> {
        self.singletons.get(&key_of(ty))
    }

    /// Drop the singleton registered for a type definition
    pub fn evict(&self, ty: &TypeDefinition) -> Option<ObjectRef> {
        self.singletons.remove(&key_of(ty))
    }

    /// Drop every singleton whose type a realm contributed
    pub fn evict_realm(&self, id: &RealmId) -> usize {
        self.singletons.detach(id).len()
    }

    /// Take out everything a realm contributed, keeping its singletons so
    /// they can be put back with [`Injector::reattach_singletons`]
    pub fn detach_realm(&self, id: &RealmId) -> DetachedSingletons {
        let instances = self.singletons.detach(id);
        let forgotten = self.forget_realm(id);
        debug!(
            "Detached realm {}: {} singletons, {} implementations",
            id,
            instances.len(),
            forgotten
        );
        DetachedSingletons { instances }
    }

    /// Re-register detached singletons whose definition is still unclaimed
    pub fn reattach_singletons(&self, detached: DetachedSingletons) -> usize {
        self.singletons.reattach(detached.instances)
    }

    /// Drop cached factories and implementations a realm contributed
    pub fn forget_realm(&self, id: &RealmId) -> usize {
        self.factories
            .retain(|(realm, _), factory| realm != id && !factory.definition().belongs_to(id));
        self.implementations.forget(id)
    }

    /// Evict and forget everything a realm contributed
    pub fn release_realm(&self, id: &RealmId) -> usize {
        let evicted = self.evict_realm(id);
        let forgotten = self.forget_realm(id);
        if evicted + forgotten > 0 {
            info!(
                "Released realm {}: {} singletons, {} implementations",
                id, evicted, forgotten
            );
        }
        evicted
    }

    pub fn singleton_count(&self) -> usize {
        self.singletons.len()
    }

    fn obtain_at(&self, ty: &Arc<TypeDefinition>, depth: usize) -> Result<ObjectRef, InjectError> {
        let descriptor = ty.descriptor();
        match descriptor.scope() {
            Some(Scope::Singleton) => self.singleton_at(ty, depth),
            Some(Scope::Prototype) => {
                let instance = self.construct_at(ty, depth)?;
                self.initialize_at(instance, depth)
            }
            None => self.construct_at(ty, depth),
        }
    }

    fn singleton_at(&self, ty: &Arc<TypeDefinition>, depth: usize) -> Result<ObjectRef, InjectError> {
        if ty.descriptor().scope().is_none() {
            return Err(InjectError::NotAComponent(ty.name().to_string()));
        }
        self.singletons.settle(
            key_of(ty),
            || self.construct_at(ty, depth),
            |instance| self.populate(instance, depth),
        )
    }

    fn construct_at(&self, ty: &Arc<TypeDefinition>, depth: usize) -> Result<ObjectRef, InjectError> {
        let descriptor = ty.descriptor();
        if descriptor.is_abstract() {
            return Err(InjectError::InstantiationFailed {
                type_name: ty.name().to_string(),
                reason: format!("{:?} types cannot be instantiated", descriptor.kind),
            });
        }
        if !descriptor.constructor {
            return Err(InjectError::InstantiationFailed {
                type_name: ty.name().to_string(),
                reason: "no accessible default constructor".to_string(),
            });
        }

        let mut fields = BTreeMap::new();
        let ancestors = ty.ancestors()?;
        for declaring in ancestors.iter().rev().chain(std::iter::once(ty)) {
            for field in &declaring.descriptor().fields {
                let value = field
                    .default
                    .as_ref()
                    .map(Value::from)
                    .unwrap_or_else(|| Value::zero_of(&field.ty));
                fields.insert(field.name.clone(), value);
            }
        }

        let instance = Object::new(ty.clone(), fields);
        match descriptor.construction {
            Construction::InjectOnCreate => self.initialize_at(instance, depth),
            Construction::Direct | Construction::SingletonAccessor => Ok(instance),
        }
    }

    fn initialize_at(&self, instance: ObjectRef, depth: usize) -> Result<ObjectRef, InjectError> {
        let ty = instance.type_definition().clone();
        let Some(scope) = ty.descriptor().scope() else {
            return Err(InjectError::NotAComponent(ty.name().to_string()));
        };
        if instance.is_initialized() {
            return Ok(instance);
        }
        if depth > MAX_DEPTH {
            return Err(InjectError::InstantiationFailed {
                type_name: ty.name().to_string(),
                reason: format!("dependency chain deeper than {}", MAX_DEPTH),
            });
        }

        if scope == Scope::Singleton {
            return self.singletons.settle(
                key_of(&ty),
                || Ok(instance.clone()),
                |candidate| self.populate(candidate, depth),
            );
        }
        self.populate(&instance, depth)?;
        Ok(instance)
    }

    /// Inject the fields of an instance and assign its identifier, once
    fn populate(&self, instance: &ObjectRef, depth: usize) -> Result<(), InjectError> {
        let ty = instance.type_definition().clone();
        let factory = self.factory(&ty)?;
        if !instance.begin_initialization() {
            return Ok(());
        }

        let populated = factory
            .points()
            .iter()
            .try_for_each(|point| self.inject(instance, point, depth));
        if let Err(e) = populated {
            instance.abandon_initialization();
            return Err(e);
        }

        let unset = match instance.get(factory.identifier()) {
            None | Some(Value::Null) | Some(Value::Int(0)) => true,
            Some(_) => false,
        };
        if unset {
            let id = self.next_identifier();
            instance.set(factory.identifier(), Value::Int(id));
            debug!("Assigned {}.{} = {}", ty.name(), factory.identifier(), id);
        }
        Ok(())
    }

    fn inject(&self, instance: &ObjectRef, point: &InjectionPoint, depth: usize) -> Result<(), InjectError> {
        let component = instance.type_name().to_string();
        let target_name = point.target();
        if is_builtin_type(target_name) {
            return Err(InjectError::TypeMismatch {
                component,
                field: point.field.clone(),
                expected: "a component or contract".to_string(),
                actual: target_name.to_string(),
            });
        }

        let target = point.declaring.resolve(target_name)?;
        let chosen = if target.descriptor().is_abstract() {
            let home = point.declaring.realm()?;
            let candidates = self.implementations.candidates(&target, &home)?;
            match candidates.len() {
                0 if point.required => {
                    return Err(InjectError::MissingImplementation {
                        component,
                        field: point.field.clone(),
                        contract: target.name().to_string(),
                    });
                }
                0 => {
                    debug!("Optional {}.{} left unset", component, point.field);
                    return Ok(());
                }
                1 => candidates[0].clone(),
                _ => {
                    let names: Vec<String> =
                        candidates.iter().map(|c| c.name().to_string()).collect();
                    if point.required {
                        return Err(InjectError::AmbiguousImplementation {
                            component,
                            field: point.field.clone(),
                            contract: target.name().to_string(),
                            candidates: names,
                        });
                    }
                    warn!(
                        "Optional {}.{} has several implementations of {}: {:?}, using {}",
                        component,
                        point.field,
                        target.name(),
                        names,
                        names[0]
                    );
                    candidates[0].clone()
                }
            }
        } else {
            target
        };

        let value = self.obtain_at(&chosen, depth + 1)?;

        let declared = point.declaring.resolve(&point.field_type)?;
        if !value.type_definition().is_assignable_to(&declared)? {
            return Err(InjectError::TypeMismatch {
                component,
                field: point.field.clone(),
                expected: point.field_type.clone(),
                actual: value.type_name().to_string(),
            });
        }

        instance.set(&point.field, Value::Object(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentingProvider;
    use crate::realm::{BytesProvider, MemoryProvider};
    use modhost_kernel::{FieldDecl, INT_TYPE, TypeDescriptor};

    fn realm(types: Vec<TypeDescriptor>) -> Arc<Realm> {
        let memory = types
            .into_iter()
            .fold(MemoryProvider::new(), |p, t| p.with_type(t));
        let provider: Arc<dyn BytesProvider> =
            Arc::new(InstrumentingProvider::new(Arc::new(memory)));
        let realm = Realm::new(RealmId::new("test", 1), None);
        realm.add_provider(provider);
        realm
    }

    fn component(name: &str, scope: Scope) -> TypeDescriptor {
        TypeDescriptor::class(name)
            .with_component(scope)
            .with_field(FieldDecl::identifier("id"))
    }

    #[test]
    fn test_prototypes_are_distinct_with_increasing_ids() {
        let realm = realm(vec![component("demo.P", Scope::Prototype)]);
        let injector = Injector::new();
        let ty = realm.resolve("demo.P").unwrap();

        let ids: Vec<i64> = (0..4)
            .map(|_| injector.obtain(&ty).unwrap().get("id").unwrap().as_int().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(injector.last_identifier(), ids[3]);
        assert_eq!(injector.singleton_count(), 0);
    }

    #[test]
    fn test_singleton_identity() {
        let realm = realm(vec![component("demo.S", Scope::Singleton)]);
        let injector = Injector::new();
        let ty = realm.resolve("demo.S").unwrap();

        let a = injector.obtain(&ty).unwrap();
        let b = injector.singleton(&ty).unwrap();
        assert!(Object::same(&a, &b));
        assert_eq!(injector.singleton_count(), 1);

        // A stray instance is swapped for the registered one.
        let stray = injector.construct(&ty).unwrap();
        let resolved = injector.initialize(stray).unwrap();
        assert!(Object::same(&resolved, &a));

        assert!(injector.evict(&ty).is_some());
        let c = injector.obtain(&ty).unwrap();
        assert!(!Object::same(&a, &c));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let realm = realm(vec![component("demo.P", Scope::Prototype)]);
        let injector = Injector::new();
        let instance = injector.obtain(&realm.resolve("demo.P").unwrap()).unwrap();
        let id = instance.get("id");
        let again = injector.initialize(instance.clone()).unwrap();
        assert!(Object::same(&instance, &again));
        assert_eq!(again.get("id"), id);
        assert_eq!(injector.last_identifier(), 1);
    }

    #[test]
    fn test_not_a_component() {
        let realm = realm(vec![TypeDescriptor::class("demo.Plain")]);
        let injector = Injector::new();
        let plain = injector.construct(&realm.resolve("demo.Plain").unwrap()).unwrap();
        assert!(matches!(
            injector.initialize(plain),
            Err(InjectError::NotAComponent(name)) if name == "demo.Plain"
        ));
    }

    #[test]
    fn test_identifier_validation_on_concrete_type() {
        let realm = realm(vec![
            component("demo.Base", Scope::Prototype),
            TypeDescriptor::class("demo.Child")
                .with_component(Scope::Prototype)
                .with_extends("demo.Base"),
        ]);
        let injector = Injector::new();
        let child = realm.resolve("demo.Child").unwrap();
        assert!(matches!(
            injector.obtain(&child),
            Err(InjectError::MissingIdentifierField(name)) if name == "demo.Child"
        ));
    }

    #[test]
    fn test_dependencies_are_populated() {
        let realm = realm(vec![
            component("demo.Store", Scope::Singleton),
            component("demo.Service", Scope::Prototype)
                .with_field(FieldDecl::injected("store", "demo.Store", true)),
        ]);
        let injector = Injector::new();
        let ty = realm.resolve("demo.Service").unwrap();

        let a = injector.obtain(&ty).unwrap();
        let b = injector.obtain(&ty).unwrap();
        let store_a = a.dependency("store").unwrap();
        let store_b = b.dependency("store").unwrap();
        assert!(Object::same(&store_a, &store_b));
        assert!(store_a.is_initialized());
    }

    #[test]
    fn test_contract_resolution() {
        let contract = TypeDescriptor::interface("demo.Sink");
        let user = |required: bool| {
            component("demo.User", Scope::Prototype)
                .with_field(FieldDecl::injected("sink", "demo.Sink", required))
        };
        let sink = |name: &str| component(name, Scope::Prototype).with_implements("demo.Sink");

        // No implementation, required.
        let r = realm(vec![contract.clone(), user(true)]);
        let injector = Injector::new();
        assert!(matches!(
            injector.obtain(&r.resolve("demo.User").unwrap()),
            Err(InjectError::MissingImplementation { .. })
        ));

        // No implementation, optional.
        let r = realm(vec![contract.clone(), user(false)]);
        let injector = Injector::new();
        let obj = injector.obtain(&r.resolve("demo.User").unwrap()).unwrap();
        assert_eq!(obj.get("sink"), Some(Value::Null));

        // Exactly one.
        let r = realm(vec![contract.clone(), user(true), sink("demo.FileSink")]);
        let injector = Injector::new();
        assert_eq!(injector.register_implementations(&r, ["demo.FileSink"]), 1);
        let obj = injector.obtain(&r.resolve("demo.User").unwrap()).unwrap();
        assert_eq!(obj.dependency("sink").unwrap().type_name(), "demo.FileSink");

        // Several, required.
        let r = realm(vec![
            contract.clone(),
            user(true),
            sink("demo.FileSink"),
            sink("demo.NetSink"),
        ]);
        let injector = Injector::new();
        injector.register_implementations(&r, ["demo.FileSink", "demo.NetSink", "demo.Nowhere"]);
        match injector.obtain(&r.resolve("demo.User").unwrap()) {
            Err(InjectError::AmbiguousImplementation { candidates, .. }) => {
                assert_eq!(candidates, vec!["demo.FileSink", "demo.NetSink"]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }

        // Several, optional: first in registration order.
        let r = realm(vec![contract, user(false), sink("demo.FileSink"), sink("demo.NetSink")]);
        let injector = Injector::new();
        injector.register_implementations(&r, ["demo.NetSink", "demo.FileSink"]);
        let obj = injector.obtain(&r.resolve("demo.User").unwrap()).unwrap();
        assert_eq!(obj.dependency("sink").unwrap().type_name(), "demo.NetSink");
    }

    #[test]
    fn test_concrete_override_and_type_check() {
        let r = realm(vec![
            TypeDescriptor::interface("demo.Sink"),
            component("demo.FileSink", Scope::Prototype).with_implements("demo.Sink"),
            component("demo.Other", Scope::Prototype),
            component("demo.Good", Scope::Prototype).with_field(
                FieldDecl::injected("sink", "demo.Sink", true).with_concrete("demo.FileSink"),
            ),
            component("demo.Bad", Scope::Prototype).with_field(
                FieldDecl::injected("sink", "demo.Sink", true).with_concrete("demo.Other"),
            ),
        ]);
        let injector = Injector::new();

        let good = injector.obtain(&r.resolve("demo.Good").unwrap()).unwrap();
        assert_eq!(good.dependency("sink").unwrap().type_name(), "demo.FileSink");

        assert!(matches!(
            injector.obtain(&r.resolve("demo.Bad").unwrap()),
            Err(InjectError::TypeMismatch { field, .. }) if field == "sink"
        ));
    }

    #[test]
    fn test_constructor_rules() {
        let r = realm(vec![
            TypeDescriptor::abstract_class("demo.Abstract"),
            component("demo.Hidden", Scope::Prototype).without_constructor(),
        ]);
        let injector = Injector::new();
        assert!(matches!(
            injector.construct(&r.resolve("demo.Abstract").unwrap()),
            Err(InjectError::InstantiationFailed { .. })
        ));
        assert!(matches!(
            injector.obtain(&r.resolve("demo.Hidden").unwrap()),
            Err(InjectError::InstantiationFailed { .. })
        ));
    }

    #[test]
    fn test_prototype_cycle_is_bounded() {
        let r = realm(vec![
            component("demo.Ping", Scope::Prototype)
                .with_field(FieldDecl::injected("pong", "demo.Pong", true)),
            component("demo.Pong", Scope::Prototype)
                .with_field(FieldDecl::injected("ping", "demo.Ping", true)),
        ]);
        let injector = Injector::new();
        assert!(matches!(
            injector.obtain(&r.resolve("demo.Ping").unwrap()),
            Err(InjectError::InstantiationFailed { .. })
        ));
    }

    #[test]
    fn test_singleton_cycle_sees_partial_instance() {
        let r = realm(vec![
            component("demo.Left", Scope::Singleton)
                .with_field(FieldDecl::injected("right", "demo.Right", true)),
            component("demo.Right", Scope::Singleton)
                .with_field(FieldDecl::injected("left", "demo.Left", true)),
        ]);
        let injector = Injector::new();
        let left = injector.obtain(&r.resolve("demo.Left").unwrap()).unwrap();
        let right = left.dependency("right").unwrap();
        assert!(Object::same(&right.dependency("left").unwrap(), &left));
        assert_eq!(injector.singleton_count(), 2);
    }

    #[test]
    fn test_release_realm() {
        let r = realm(vec![component("demo.S", Scope::Singleton)]);
        let injector = Injector::new();
        let ty = r.resolve("demo.S").unwrap();
        injector.obtain(&ty).unwrap();
        assert_eq!(injector.release_realm(r.id()), 1);
        assert_eq!(injector.singleton_count(), 0);
        assert!(injector.registered(&ty).is_none());
    }

    #[test]
    fn test_same_name_in_two_realms_gets_two_singletons() {
        let first = realm(vec![component("demo.S", Scope::Singleton)]);
        let second = Realm::new(RealmId::new("other", 1), None);
        second.add_provider(Arc::new(InstrumentingProvider::new(Arc::new(
            MemoryProvider::new().with_type(component("demo.S", Scope::Singleton)),
        ))));
        let injector = Injector::new();

        let a = injector.obtain(&first.resolve("demo.S").unwrap()).unwrap();
        let b = injector.obtain(&second.resolve("demo.S").unwrap()).unwrap();
        assert!(!Object::same(&a, &b));
        assert_eq!(a.type_definition().realm_id(), first.id());
        assert_eq!(b.type_definition().realm_id(), second.id());
        assert_eq!(injector.singleton_count(), 2);

        // Releasing one realm leaves the other's instance alone.
        injector.release_realm(first.id());
        let again = injector.obtain(&second.resolve("demo.S").unwrap()).unwrap();
        assert!(Object::same(&again, &b));
    }

    #[test]
    fn test_concurrent_singleton_is_complete_for_every_caller() {
        const FIELDS: usize = 24;
        const THREADS: usize = 8;

        let mut hub = component("demo.Hub", Scope::Singleton);
        for i in 0..FIELDS {
            hub = hub.with_field(FieldDecl::injected(&format!("part{}", i), "demo.Part", true));
        }
        let r = realm(vec![hub, component("demo.Part", Scope::Prototype)]);
        let ty = r.resolve("demo.Hub").unwrap();

        for _ in 0..20 {
            let injector = Injector::new();
            let barrier = std::sync::Barrier::new(THREADS);
            let seen: Vec<ObjectRef> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..THREADS)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            injector.obtain(&ty).unwrap()
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            for hub in &seen {
                assert!(Object::same(hub, &seen[0]));
                for i in 0..FIELDS {
                    assert!(hub.dependency(&format!("part{}", i)).is_some());
                }
                assert!(hub.get("id").unwrap().as_int().unwrap() > 0);
            }
            assert_eq!(injector.singleton_count(), 1);
        }
    }

    #[test]
    fn test_failed_initialization_can_be_retried() {
        let r = realm(vec![
            TypeDescriptor::interface("demo.Sink"),
            component("demo.FileSink", Scope::Prototype).with_implements("demo.Sink"),
            component("demo.User", Scope::Prototype)
                .with_field(FieldDecl::injected("sink", "demo.Sink", true)),
        ]);
        let injector = Injector::new();
        let user = injector.construct(&r.resolve("demo.User").unwrap()).unwrap();

        assert!(matches!(
            injector.initialize(user.clone()),
            Err(InjectError::MissingImplementation { .. })
        ));
        assert!(!user.is_initialized());

        injector.register_implementations(&r, ["demo.FileSink"]);
        let done = injector.initialize(user.clone()).unwrap();
        assert!(Object::same(&done, &user));
        assert_eq!(user.dependency("sink").unwrap().type_name(), "demo.FileSink");
        assert!(user.get("id").unwrap().as_int().unwrap() > 0);
    }

    #[test]
    fn test_failed_singleton_is_not_registered() {
        let r = realm(vec![
            TypeDescriptor::interface("demo.Sink"),
            component("demo.FileSink", Scope::Prototype).with_implements("demo.Sink"),
            component("demo.Hub", Scope::Singleton)
                .with_field(FieldDecl::injected("sink", "demo.Sink", true)),
        ]);
        let injector = Injector::new();
        let ty = r.resolve("demo.Hub").unwrap();

        assert!(injector.obtain(&ty).is_err());
        assert!(injector.registered(&ty).is_none());

        injector.register_implementations(&r, ["demo.FileSink"]);
        let hub = injector.obtain(&ty).unwrap();
        assert!(Object::same(&injector.registered(&ty).unwrap(), &hub));
    }

    #[test]
    fn test_detached_singletons_come_back() {
        let r = realm(vec![component("demo.S", Scope::Singleton)]);
        let injector = Injector::new();
        let ty = r.resolve("demo.S").unwrap();
        let original = injector.obtain(&ty).unwrap();

        let detached = injector.detach_realm(r.id());
        assert_eq!(detached.len(), 1);
        assert!(injector.registered(&ty).is_none());

        assert_eq!(injector.reattach_singletons(detached), 1);
        assert!(Object::same(&injector.obtain(&ty).unwrap(), &original));
    }

    #[test]
    fn test_unmarked_int_fields() {
        let r = realm(vec![
            TypeDescriptor::class("demo.Plain")
                .with_component(Scope::Prototype)
                .with_field(FieldDecl::new("count", INT_TYPE)),
        ]);
        let injector = Injector::new();
        assert!(matches!(
            injector.obtain(&r.resolve("demo.Plain").unwrap()),
            Err(InjectError::MissingIdentifierField(_))
        ));
    }
}
