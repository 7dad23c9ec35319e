//! Reconcilers for the declarative kinds.
//!
//! - `machine`: converges one Incus VM per `IncusMachine`
//! - `cluster`: observes `IncusCluster` objects; no cluster-level resources yet

use async_trait::async_trait;
use capi_incus_reconcile::{Context, ObjectKey, Requeue, Resource};

use crate::error::ReconcileError;

pub mod cluster;
pub mod machine;

pub use cluster::ClusterReconciler;
pub use machine::{MachineReconciler, MACHINE_FINALIZER};

/// One reconcile of one object identity.
///
/// Callers guarantee that reconciles of the same key never overlap.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Resource;

    async fn reconcile(&self, ctx: &Context, key: &ObjectKey) -> Result<Requeue, ReconcileError>;
}
