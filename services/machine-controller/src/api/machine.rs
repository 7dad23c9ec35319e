//! The `IncusMachine` kind: one Incus VM per object.

use capi_incus_reconcile::{Condition, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

/// Desired and observed state of a single VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncusMachine {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: IncusMachineSpec,

    #[serde(default)]
    pub status: IncusMachineStatus,
}

/// VM shape requested by the user.
///
/// Values below the minimum are replaced with defaults when the instance is
/// created; the spec itself is never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncusMachineSpec {
    /// Image reference, e.g. `images:ubuntu/24.04`. Empty selects the default.
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub cpus: i32,

    #[serde(default, rename = "memoryMiB")]
    pub memory_mib: i64,

    /// Root disk size in GiB. Zero keeps the image/profile default.
    #[serde(default, rename = "rootDiskSizeGiB", skip_serializing_if = "is_zero")]
    pub root_disk_size_gib: i32,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Observed state, owned by the machine reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncusMachineStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the Incus instance backing this machine. Empty before creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
}

impl IncusMachine {
    pub fn new(namespace: &str, name: &str, spec: IncusMachineSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: IncusMachineStatus::default(),
        }
    }

    /// Name of the backend instance this machine refers to.
    ///
    /// A previously recorded `instanceId` wins over the object name so that a
    /// created instance is never orphaned by a later rename.
    pub fn instance_name(&self) -> &str {
        if self.status.instance_id.is_empty() {
            &self.metadata.name
        } else {
            &self.status.instance_id
        }
    }
}

impl Resource for IncusMachine {
    const KIND: &'static str = "IncusMachine";
    type Spec = IncusMachineSpec;
    type Status = IncusMachineStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &IncusMachineSpec {
        &self.spec
    }

    fn status(&self) -> &IncusMachineStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut IncusMachineStatus {
        &mut self.status
    }
}
