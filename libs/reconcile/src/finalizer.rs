//! Finalizer marker protocol.
//!
//! A marker on an object means "backend cleanup has not been confirmed yet".
//! The marker must be present before any backend resource is created for the
//! object, and must stay until the backend reports the resource gone. The
//! store refuses to purge an object while any marker remains.
//!
//! All functions mutate in place; the caller persists.

use crate::meta::Resource;

/// Returns true if the object carries `marker`.
pub fn has_marker<R: Resource>(object: &R, marker: &str) -> bool {
    object.meta().finalizers.iter().any(|f| f == marker)
}

/// Add `marker` to the object. Returns false if it was already present.
pub fn add_marker<R: Resource>(object: &mut R, marker: &str) -> bool {
    if has_marker(object, marker) {
        return false;
    }
    object.meta_mut().finalizers.push(marker.to_string());
    true
}

/// Remove `marker` from the object. Returns false if it was absent.
pub fn remove_marker<R: Resource>(object: &mut R, marker: &str) -> bool {
    let finalizers = &mut object.meta_mut().finalizers;
    let before = finalizers.len();
    finalizers.retain(|f| f != marker);
    finalizers.len() != before
}
