//! In-memory object store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use capi_incus_reconcile::{ObjectKey, Resource};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    prepare_create, prepare_delete, prepare_status_update, prepare_update, ObjectStore, Outcome,
    StoreError,
};

/// Object store backed by a map. Used by tests and local development.
pub struct MemoryStore<T> {
    objects: RwLock<BTreeMap<ObjectKey, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> MemoryStore<T> {
    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        }
    }

    fn apply(objects: &mut BTreeMap<ObjectKey, T>, outcome: Outcome<T>) -> T {
        match outcome {
            Outcome::Stored(next) => {
                objects.insert(next.key(), next.clone());
                next
            }
            Outcome::Purged(last) => {
                debug!(kind = T::KIND, key = %last.key(), "Object purged");
                objects.remove(&last.key());
                last
            }
            Outcome::Unchanged(current) => current,
        }
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<ObjectKey>, StoreError> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    async fn create(&self, object: &T) -> Result<T, StoreError> {
        let mut objects = self.objects.write().await;
        let next = prepare_create(object, objects.get(&object.key()))?;
        objects.insert(next.key(), next.clone());
        Ok(next)
    }

    async fn update(&self, object: &T) -> Result<T, StoreError> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let current = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;
        let outcome = prepare_update(current, object)?;
        Ok(Self::apply(&mut objects, outcome))
    }

    async fn update_status(&self, object: &T) -> Result<T, StoreError> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let current = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;
        let next = prepare_status_update(current, object)?;
        objects.insert(key, next.clone());
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        let mut objects = self.objects.write().await;
        let current = objects.get(key).ok_or_else(|| Self::not_found(key))?;
        match prepare_delete(current) {
            outcome @ Outcome::Purged(_) => {
                Self::apply(&mut objects, outcome);
                Ok(None)
            }
            outcome => Ok(Some(Self::apply(&mut objects, outcome))),
        }
    }
}
