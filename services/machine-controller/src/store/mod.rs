//! Declarative object store.
//!
//! The store persists desired-state objects and their status. It follows the
//! usual declarative-API rules:
//! - every write must carry the current `resourceVersion`, else `Conflict`
//! - `update` writes metadata and spec; `update_status` writes status only
//! - `delete` only marks an object while finalizers remain; the object is
//!   purged once the last finalizer is removed
//!
//! Two adapters are provided: [`MemoryStore`] and [`SqliteStore`].

use async_trait::async_trait;
use capi_incus_reconcile::{ObjectKey, Resource};
use chrono::Utc;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("conflict writing {kind} {key}: expected resourceVersion {expected}, found {actual}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Get/list/write access to objects of one kind.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    /// Fetch an object. `None` means it does not exist (or was purged).
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError>;

    /// Keys of all stored objects, in key order.
    async fn list(&self) -> Result<Vec<ObjectKey>, StoreError>;

    /// Store a new object. Assigns uid, resourceVersion and generation.
    async fn create(&self, object: &T) -> Result<T, StoreError>;

    /// Write metadata (finalizers) and spec. Status is left untouched.
    async fn update(&self, object: &T) -> Result<T, StoreError>;

    /// Write status only.
    async fn update_status(&self, object: &T) -> Result<T, StoreError>;

    /// Request deletion. Returns the object if finalizers still hold it.
    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>, StoreError>;
}

/// Result of applying a write to the current stored object.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    /// Persist this new version.
    Stored(T),
    /// Remove the object from the store.
    Purged(T),
    /// Nothing to persist.
    Unchanged(T),
}

fn check_version<T: Resource>(current: &T, incoming: &T) -> Result<(), StoreError> {
    let expected = incoming.meta().resource_version;
    let actual = current.meta().resource_version;
    if expected != actual {
        return Err(StoreError::Conflict {
            kind: T::KIND,
            key: current.key(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn should_purge<T: Resource>(object: &T) -> bool {
    object.meta().deletion_requested() && object.meta().finalizers.is_empty()
}

pub(crate) fn prepare_create<T: Resource>(object: &T, existing: Option<&T>) -> Result<T, StoreError> {
    if existing.is_some() {
        return Err(StoreError::AlreadyExists {
            kind: T::KIND,
            key: object.key(),
        });
    }

    let mut next = object.clone();
    let meta = next.meta_mut();
    meta.uid = uuid::Uuid::new_v4().to_string();
    meta.resource_version = 1;
    meta.generation = 1;
    meta.creation_timestamp = Some(Utc::now());
    meta.deletion_timestamp = None;
    Ok(next)
}

pub(crate) fn prepare_update<T: Resource>(current: &T, incoming: &T) -> Result<Outcome<T>, StoreError> {
    check_version(current, incoming)?;

    let mut next = incoming.clone();
    *next.status_mut() = current.status().clone();

    let spec_changed = incoming.spec() != current.spec();
    let meta = next.meta_mut();
    let current_meta = current.meta();
    meta.uid = current_meta.uid.clone();
    meta.creation_timestamp = current_meta.creation_timestamp;
    meta.deletion_timestamp = current_meta.deletion_timestamp;
    meta.resource_version = current_meta.resource_version + 1;
    meta.generation = current_meta.generation + i64::from(spec_changed);
    meta.finalizers.dedup();

    if should_purge(&next) {
        return Ok(Outcome::Purged(next));
    }
    Ok(Outcome::Stored(next))
}

pub(crate) fn prepare_status_update<T: Resource>(current: &T, incoming: &T) -> Result<T, StoreError> {
    check_version(current, incoming)?;

    let mut next = current.clone();
    *next.status_mut() = incoming.status().clone();
    next.meta_mut().resource_version = current.meta().resource_version + 1;
    Ok(next)
}

pub(crate) fn prepare_delete<T: Resource>(current: &T) -> Outcome<T> {
    if current.meta().finalizers.is_empty() {
        return Outcome::Purged(current.clone());
    }
    if current.meta().deletion_requested() {
        return Outcome::Unchanged(current.clone());
    }

    let mut next = current.clone();
    let meta = next.meta_mut();
    meta.deletion_timestamp = Some(Utc::now());
    meta.resource_version += 1;
    Outcome::Stored(next)
}
