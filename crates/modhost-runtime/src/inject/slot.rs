use std::cell::RefCell;
use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use modhost_kernel::InjectError;
use parking_lot::ReentrantMutex;
use tracing::debug;

use crate::object::ObjectRef;
use crate::realm::{RealmId, TypeDefinition};

/// Definition identity: the realm that defined a type plus its name.
pub(crate) type SingletonKey = (RealmId, String);

pub(crate) fn key_of(ty: &TypeDefinition) -> SingletonKey {
    (ty.realm_id().clone(), ty.name().to_string())
}

/// Singleton registry with serialized construction.
///
/// Published instances live in `ready` and are read without locking. An
/// instance under construction is only visible to the thread building it,
/// through `building`; every other thread waits on the lock until the
/// instance is published or its construction fails.
#[derive(Default)]
pub(crate) struct SingletonRegistry {
    ready: DashMap<SingletonKey, ObjectRef>,
    building: ReentrantMutex<RefCell<HashMap<SingletonKey, ObjectRef>>>,
}

impl SingletonRegistry {
    pub fn get(&self, key: &SingletonKey) -> Option<ObjectRef> {
        self.ready.get(key).map(|s| s.clone())
    }

    /// Fetch the published instance of `key` or build one.
    ///
    /// `make` supplies the candidate instance and `populate` fills it in.
    /// While `populate` runs, re-entrant calls for the same key on the same
    /// thread get the partial candidate back.
    pub fn settle<M, P>(&self, key: SingletonKey, make: M, populate: P) -> Result<ObjectRef, InjectError>
    where
        M: FnOnce() -> Result<ObjectRef, InjectError>,
        P: FnOnce(&ObjectRef) -> Result<(), InjectError>,
    {
        if let Some(ready) = self.get(&key) {
            return Ok(ready);
        }

        let building = self.building.lock();
        if let Some(ready) = self.get(&key) {
            return Ok(ready);
        }
        let partial = building.borrow().get(&key).cloned();
        if let Some(partial) = partial {
            return Ok(partial);
        }

        let candidate = make()?;
        // `make` may have published the instance itself
        if let Some(ready) = self.get(&key) {
            return Ok(ready);
        }

        building.borrow_mut().insert(key.clone(), candidate.clone());
        let populated = populate(&candidate);
        building.borrow_mut().remove(&key);
        populated?;

        debug!("Registered singleton {} of {}", key.1, key.0);
        let published = self.ready.entry(key).or_insert(candidate).clone();
        Ok(published)
    }

    pub fn remove(&self, key: &SingletonKey) -> Option<ObjectRef> {
        self.ready.remove(key).map(|(_, instance)| instance)
    }

    /// Remove every instance whose type a realm contributed
    pub fn detach(&self, id: &RealmId) -> Vec<(SingletonKey, ObjectRef)> {
        let keys: Vec<SingletonKey> = self
            .ready
            .iter()
            .filter(|entry| entry.value().type_definition().belongs_to(id))
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.ready.remove(&key))
            .collect()
    }

    /// Put detached instances back unless the key was claimed meanwhile
    pub fn reattach(&self, instances: Vec<(SingletonKey, ObjectRef)>) -> usize {
        let mut restored = 0;
        for (key, instance) in instances {
            if let Entry::Vacant(slot) = self.ready.entry(key) {
                slot.insert(instance);
                restored += 1;
            }
        }
        restored
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }
}
