//! Cluster reconciler.
//!
//! `IncusCluster` objects carry no backend resources yet. The reconciler only
//! confirms the object is readable and logs it.

use std::sync::Arc;

use async_trait::async_trait;
use capi_incus_reconcile::{Context, ObjectKey, Requeue};
use tracing::{debug, instrument};

use super::Reconciler;
use crate::api::IncusCluster;
use crate::error::ReconcileError;
use crate::store::ObjectStore;

pub struct ClusterReconciler {
    store: Arc<dyn ObjectStore<IncusCluster>>,
}

impl ClusterReconciler {
    pub fn new(store: Arc<dyn ObjectStore<IncusCluster>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    type Object = IncusCluster;

    #[instrument(skip_all, fields(cluster = %key))]
    async fn reconcile(&self, _ctx: &Context, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        match self.store.get(key).await? {
            Some(cluster) => {
                debug!(
                    network = %cluster.spec.network,
                    deleting = cluster.metadata.deletion_requested(),
                    "Observed IncusCluster"
                );
            }
            None => debug!("IncusCluster not found, nothing to do"),
        }
        Ok(Requeue::Never)
    }
}
