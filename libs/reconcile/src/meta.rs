//! Object metadata and identity shared by all declarative kinds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
    "default".to_string()
}

/// Metadata carried by every declarative object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Stable object name, unique within its namespace.
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Store-assigned unique id.
    #[serde(default)]
    pub uid: String,

    /// Optimistic concurrency token, bumped on every write.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set by the store when deletion has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    /// Create metadata for a new object in the given namespace.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: String::new(),
            resource_version: 0,
            generation: 0,
            creation_timestamp: None,
            deletion_timestamp: None,
            finalizers: Vec::new(),
        }
    }

    /// Returns true once deletion of the object has been requested.
    pub fn deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The identity of this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Identity of a declarative object: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A declarative kind with metadata, a desired spec and an observed status.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name, used for storage and logging.
    const KIND: &'static str;

    type Spec: Clone + PartialEq + Send + Sync;
    type Status: Clone + PartialEq + Default + Send + Sync;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}
