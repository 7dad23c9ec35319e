//! The `IncusCluster` kind.

use capi_incus_reconcile::{Condition, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncusCluster {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: IncusClusterSpec,

    #[serde(default)]
    pub status: IncusClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncusClusterSpec {
    /// Incus network the cluster's machines attach to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncusClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl IncusCluster {
    pub fn new(namespace: &str, name: &str, spec: IncusClusterSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: IncusClusterStatus::default(),
        }
    }
}

impl Resource for IncusCluster {
    const KIND: &'static str = "IncusCluster";
    type Spec = IncusClusterSpec;
    type Status = IncusClusterStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &IncusClusterSpec {
        &self.spec
    }

    fn status(&self) -> &IncusClusterStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut IncusClusterStatus {
        &mut self.status
    }
}
