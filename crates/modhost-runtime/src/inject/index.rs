use std::collections::HashMap;
use std::sync::Arc;

use modhost_kernel::RealmError;
use parking_lot::RwLock;

use crate::realm::{Realm, RealmId, TypeDefinition};

/// Contract name → concrete implementations, in registration order.
#[derive(Default)]
pub(crate) struct ImplementationIndex {
    by_contract: RwLock<HashMap<String, Vec<Arc<TypeDefinition>>>>,
}

impl ImplementationIndex {
    /// Index a concrete type under every abstract supertype.
    ///
    /// Returns the number of contracts it was added to.
    pub fn register(&self, ty: &Arc<TypeDefinition>) -> Result<usize, RealmError> {
        if ty.descriptor().is_abstract() {
            return Ok(0);
        }
        let contracts: Vec<String> = ty
            .supertypes()?
            .into_iter()
            .filter(|s| s.descriptor().is_abstract())
            .map(|s| s.name().to_string())
            .collect();

        let mut index = self.by_contract.write();
        for contract in &contracts {
            let list = index.entry(contract.clone()).or_default();
            if !list.iter().any(|known| known.same(ty)) {
                list.push(ty.clone());
            }
        }
        Ok(contracts.len())
    }

    /// Implementations of `contract` that `from` would resolve to the same
    /// definitions
    pub fn candidates(
        &self,
        contract: &TypeDefinition,
        from: &Realm,
    ) -> Result<Vec<Arc<TypeDefinition>>, RealmError> {
        let registered = self
            .by_contract
            .read()
            .get(contract.name())
            .cloned()
            .unwrap_or_default();

        let mut visible = Vec::new();
        for candidate in registered {
            let seen = from.find(candidate.name())?;
            if !seen.is_some_and(|ty| ty.same(&candidate)) {
                continue;
            }
            if candidate.is_assignable_to(contract)? {
                visible.push(candidate);
            }
        }
        Ok(visible)
    }

    /// Drop every implementation contributed by a realm
    pub fn forget(&self, id: &RealmId) -> usize {
        let mut index = self.by_contract.write();
        let mut removed = 0;
        for list in index.values_mut() {
            let before = list.len();
            list.retain(|ty| !ty.belongs_to(id));
            removed += before - list.len();
        }
        index.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn contracts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_contract.read().keys().cloned().collect();
        names.sort();
        names
    }
}
