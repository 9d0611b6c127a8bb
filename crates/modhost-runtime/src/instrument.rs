//! Instrumentation stage
//!
//! Decorates a byte-provider and rewrites component definitions on their way
//! into a realm, so that no instance of a component can be observed before
//! its injected fields are populated:
//!
//! - prototype components get the `inject-on-create` construction plan
//! - singleton components lose any hand-written accessor and get the
//!   `singleton-accessor` plan
//! - the identifier field is chosen once and recorded in the definition

use std::collections::HashSet;
use std::sync::Arc;

use modhost_kernel::{Construction, RealmError, Scope, TypeDescriptor};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::realm::{BytesProvider, Realm, RealmId};

/// Rewriting byte-provider.
pub struct InstrumentingProvider {
    inner: Arc<dyn BytesProvider>,
    skip_prefixes: Vec<String>,
    produced: Mutex<HashSet<String>>,
}

impl InstrumentingProvider {
    /// Create a new instrumenting provider over `inner`
    pub fn new(inner: Arc<dyn BytesProvider>) -> Self {
        Self {
            inner,
            skip_prefixes: Vec::new(),
            produced: Mutex::new(HashSet::new()),
        }
    }

    /// Leave names starting with these prefixes untouched
    pub fn with_skip_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    fn skips(&self, name: &str) -> bool {
        self.skip_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Whether a name has already been handed out
    pub fn has_produced(&self, name: &str) -> bool {
        self.produced.lock().contains(name)
    }

    /// Rewrite one definition
    pub fn rewrite(name: &str, bytes: &[u8]) -> Result<Vec<u8>, RealmError> {
        let mut descriptor = TypeDescriptor::from_bytes(name, bytes)?;
        let Some(scope) = descriptor.scope() else {
            return Ok(bytes.to_vec());
        };

        let candidates = descriptor.identifier_candidates();
        match candidates.len() {
            0 => {}
            1 => descriptor.identifier = candidates.into_iter().next(),
            _ => {
                warn!("Refusing to instrument {}: identifier fields {:?}", name, candidates);
                return Err(RealmError::AmbiguousIdentifierField {
                    type_name: name.to_string(),
                    fields: candidates,
                });
            }
        }

        descriptor.construction = match scope {
            Scope::Prototype => Construction::InjectOnCreate,
            Scope::Singleton => {
                if let Some(accessor) = descriptor.accessor.take() {
                    debug!("Replaced accessor {} of {}", accessor, name);
                }
                Construction::SingletonAccessor
            }
        };

        debug!(
            "Instrumented {} ({} scope, plan {:?})",
            name, scope, descriptor.construction
        );

        descriptor.to_bytes().map_err(|e| RealmError::Rewrite {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl BytesProvider for InstrumentingProvider {
    fn provide(&self, name: &str) -> Result<Option<Vec<u8>>, RealmError> {
        if self.has_produced(name) {
            return Ok(None);
        }

        let Some(bytes) = self.inner.provide(name)? else {
            return Ok(None);
        };

        let output = if self.skips(name) {
            bytes
        } else {
            Self::rewrite(name, &bytes)?
        };

        // Two callers racing on one name: only the first gets the bytes.
        if !self.produced.lock().insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(output))
    }

    fn owner(&self) -> Option<&RealmId> {
        self.inner.owner()
    }

    fn home(&self) -> Option<Arc<Realm>> {
        self.inner.home()
    }

    fn describe(&self) -> String {
        format!("instrumented {}", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::MemoryProvider;
    use modhost_kernel::{FieldDecl, INT_TYPE};

    fn provider(types: Vec<TypeDescriptor>) -> InstrumentingProvider {
        let inner = types
            .into_iter()
            .fold(MemoryProvider::new(), |p, t| p.with_type(t));
        InstrumentingProvider::new(Arc::new(inner)).with_skip_prefixes(["std."])
    }

    fn rewritten(provider: &InstrumentingProvider, name: &str) -> TypeDescriptor {
        let bytes = provider.provide(name).unwrap().unwrap();
        TypeDescriptor::from_bytes(name, &bytes).unwrap()
    }

    #[test]
    fn test_prototype_gets_inject_on_create() {
        let p = provider(vec![
            TypeDescriptor::class("demo.A")
                .with_component(Scope::Prototype)
                .with_field(FieldDecl::new("id", INT_TYPE)),
        ]);
        let desc = rewritten(&p, "demo.A");
        assert_eq!(desc.construction, Construction::InjectOnCreate);
        assert_eq!(desc.identifier.as_deref(), Some("id"));
    }

    #[test]
    fn test_singleton_accessor_replaced() {
        let p = provider(vec![
            TypeDescriptor::class("demo.S")
                .with_component(Scope::Singleton)
                .with_accessor("get_instance")
                .with_field(FieldDecl::identifier("id")),
        ]);
        let desc = rewritten(&p, "demo.S");
        assert_eq!(desc.construction, Construction::SingletonAccessor);
        assert!(desc.accessor.is_none());
    }

    #[test]
    fn test_plain_and_skipped_types_unchanged() {
        let plain = TypeDescriptor::class("demo.Plain").with_accessor("keep");
        let core = TypeDescriptor::class("std.Core").with_component(Scope::Prototype);
        let p = provider(vec![plain.clone(), core.clone()]);

        assert_eq!(rewritten(&p, "demo.Plain"), plain);
        assert_eq!(rewritten(&p, "std.Core"), core);
    }

    #[test]
    fn test_each_name_produced_once() {
        let p = provider(vec![TypeDescriptor::class("demo.A")]);
        assert!(p.provide("demo.A").unwrap().is_some());
        assert!(p.has_produced("demo.A"));
        assert!(p.provide("demo.A").unwrap().is_none());
        // Unknown names are not remembered.
        assert!(p.provide("demo.Missing").unwrap().is_none());
        assert!(!p.has_produced("demo.Missing"));
    }

    #[test]
    fn test_ambiguous_identifier_fails_fast() {
        let p = provider(vec![
            TypeDescriptor::class("demo.Two")
                .with_component(Scope::Prototype)
                .with_field(FieldDecl::new("id", INT_TYPE))
                .with_field(FieldDecl::new("owner_id", INT_TYPE)),
        ]);
        match p.provide("demo.Two") {
            Err(RealmError::AmbiguousIdentifierField { type_name, fields }) => {
                assert_eq!(type_name, "demo.Two");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.map(|b| b.len()))),
        }
        assert!(!p.has_produced("demo.Two"));
    }
}
