//! Machine reconciler.
//!
//! Converges one Incus VM per `IncusMachine`. The state of an object is
//! derived on every reconcile, never stored:
//!
//! ```text
//! deletion  finalizer  instance   step
//! no        absent     -          add finalizer, requeue (no backend call)
//! no        present    absent     create, confirm, record instanceId
//! no        present    present    adopt: sync instanceId / Ready if needed
//! yes       present    present    delete, confirm absence, remove finalizer
//! yes       present    absent     remove finalizer
//! yes       absent     -          done
//! ```
//!
//! Backend mutations are always gated on a fresh existence check, which makes
//! the sequence safe under redelivery at any point. Errors abort the
//! reconcile without touching `instanceId` or finalizers; the next delivery
//! starts again from persisted state.

use std::sync::Arc;

use async_trait::async_trait;
use capi_incus_reconcile::{
    finalizer, set_condition, Condition, ConditionStatus, Context, ObjectKey, Requeue,
};
use tracing::{debug, error, info, instrument, warn};

use super::Reconciler;
use crate::api::{IncusMachine, IncusMachineSpec};
use crate::backend::{InstanceBackend, InstanceRequest};
use crate::error::ReconcileError;
use crate::store::ObjectStore;

/// Marker held on every machine until its instance is confirmed gone.
pub const MACHINE_FINALIZER: &str = "infrastructure.cluster.x-k8s.io/incusmachine";

/// Image used when the spec leaves it empty.
pub const DEFAULT_IMAGE: &str = "images:ubuntu/24.04";

pub const DEFAULT_CPUS: u32 = 2;

pub const DEFAULT_MEMORY_MIB: u64 = 2048;

/// Condition type summarising the machine's instance.
pub const READY_CONDITION: &str = "Ready";

/// Resolve the instance parameters for a spec, applying defaults.
pub fn instance_request(name: &str, spec: &IncusMachineSpec) -> InstanceRequest {
    let image = if spec.image.is_empty() {
        DEFAULT_IMAGE.to_string()
    } else {
        spec.image.clone()
    };
    let cpus = u32::try_from(spec.cpus)
        .ok()
        .filter(|c| *c >= 1)
        .unwrap_or(DEFAULT_CPUS);
    let memory_mib = u64::try_from(spec.memory_mib)
        .ok()
        .filter(|m| *m >= 1)
        .unwrap_or(DEFAULT_MEMORY_MIB);
    let root_disk_size_gib = u32::try_from(spec.root_disk_size_gib)
        .ok()
        .filter(|s| *s > 0);

    InstanceRequest {
        name: name.to_string(),
        image,
        cpus,
        memory_mib,
        root_disk_size_gib,
    }
}

/// What to do before any backend observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Live object without our marker: add it and requeue.
    AddFinalizer,
    /// Deleted object without our marker: nothing left to do.
    Done,
    /// Query the backend, then [`resolve`].
    Observe(Pending),
}

/// A decision that depends on whether the instance exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    Live { instance: String },
    Deleting { instance: String },
}

impl Pending {
    /// Instance name to look up: `instanceId` if recorded, else object name.
    pub fn instance(&self) -> &str {
        match self {
            Pending::Live { instance } | Pending::Deleting { instance } => instance,
        }
    }
}

/// Backend-aware step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Create(InstanceRequest),
    Adopt { instance: String },
    Delete { instance: String },
    RemoveFinalizer,
}

/// Classify a machine from its metadata alone.
pub fn decide(machine: &IncusMachine) -> Decision {
    let has_marker = finalizer::has_marker(machine, MACHINE_FINALIZER);
    let instance = machine.instance_name().to_string();

    match (machine.metadata.deletion_requested(), has_marker) {
        (false, false) => Decision::AddFinalizer,
        (false, true) => Decision::Observe(Pending::Live { instance }),
        (true, true) => Decision::Observe(Pending::Deleting { instance }),
        (true, false) => Decision::Done,
    }
}

/// Turn a pending decision into a step, given observed existence.
pub fn resolve(machine: &IncusMachine, pending: Pending, exists: bool) -> Step {
    match (pending, exists) {
        (Pending::Live { instance }, false) => {
            Step::Create(instance_request(&instance, &machine.spec))
        }
        (Pending::Live { instance }, true) => Step::Adopt { instance },
        (Pending::Deleting { instance }, true) => Step::Delete { instance },
        (Pending::Deleting { .. }, false) => Step::RemoveFinalizer,
    }
}

/// Reconciler for `IncusMachine` objects.
pub struct MachineReconciler {
    store: Arc<dyn ObjectStore<IncusMachine>>,
    backend: Arc<dyn InstanceBackend>,
}

impl MachineReconciler {
    pub fn new(store: Arc<dyn ObjectStore<IncusMachine>>, backend: Arc<dyn InstanceBackend>) -> Self {
        Self { store, backend }
    }

    /// Run one reconcile for `key`.
    #[instrument(skip_all, fields(machine = %key))]
    pub async fn reconcile_machine(
        &self,
        ctx: &Context,
        key: &ObjectKey,
    ) -> Result<Requeue, ReconcileError> {
        let Some(machine) = self.store.get(key).await? else {
            debug!("IncusMachine not found, nothing to do");
            return Ok(Requeue::Never);
        };

        let pending = match decide(&machine) {
            Decision::Done => {
                debug!("Deletion complete, waiting for purge");
                return Ok(Requeue::Never);
            }
            Decision::AddFinalizer => return self.add_finalizer(machine).await,
            Decision::Observe(pending) => pending,
        };

        let instance = pending.instance().to_string();
        let exists = match self.observe(ctx, &instance).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(instance = %instance, error = %e, "Failed to check if instance exists");
                return Err(self.fail(machine, e).await);
            }
        };

        match resolve(&machine, pending, exists) {
            Step::Create(request) => self.create(ctx, machine, request).await,
            Step::Adopt { instance } => self.adopt(machine, &instance).await,
            Step::Delete { instance } => self.delete(ctx, machine, &instance).await,
            Step::RemoveFinalizer => self.remove_finalizer(machine).await,
        }
    }

    /// Connect, then check existence.
    async fn observe(&self, ctx: &Context, instance: &str) -> Result<bool, ReconcileError> {
        self.backend.connect(ctx).await?;
        Ok(self.backend.instance_exists(ctx, instance).await?)
    }

    async fn add_finalizer(&self, mut machine: IncusMachine) -> Result<Requeue, ReconcileError> {
        finalizer::add_marker(&mut machine, MACHINE_FINALIZER);
        self.store.update(&machine).await?;
        debug!("Added finalizer");
        Ok(Requeue::Immediate)
    }

    async fn create(
        &self,
        ctx: &Context,
        machine: IncusMachine,
        request: InstanceRequest,
    ) -> Result<Requeue, ReconcileError> {
        info!(
            instance = %request.name,
            image = %request.image,
            cpus = request.cpus,
            memory_mib = request.memory_mib,
            root_disk_size_gib = ?request.root_disk_size_gib,
            "Creating Incus VM instance"
        );

        if let Err(e) = self.backend.create_instance(ctx, &request).await {
            error!(instance = %request.name, error = %e, "Failed to create Incus instance");
            return Err(self.fail(machine, e.into()).await);
        }

        // Only record the instance once the backend shows it.
        match self.backend.instance_exists(ctx, &request.name).await {
            Ok(true) => {}
            Ok(false) => {
                let err = ReconcileError::CreateUnconfirmed {
                    instance: request.name.clone(),
                };
                error!(instance = %request.name, error = %err, "Created instance not observed");
                return Err(self.fail(machine, err).await);
            }
            Err(e) => {
                error!(instance = %request.name, error = %e, "Failed to confirm instance creation");
                return Err(self.fail(machine, e.into()).await);
            }
        }

        self.adopt(machine, &request.name).await?;
        info!(instance = %request.name, "Created Incus VM instance");
        Ok(Requeue::Never)
    }

    /// Record the observed instance in status. Writes only on change.
    async fn adopt(&self, mut machine: IncusMachine, instance: &str) -> Result<Requeue, ReconcileError> {
        let mut status = machine.status.clone();
        status.instance_id = instance.to_string();
        set_condition(
            &mut status.conditions,
            Condition::new(
                READY_CONDITION,
                ConditionStatus::True,
                "InstanceReady",
                format!("instance {instance} exists"),
            )
            .with_generation(machine.metadata.generation),
        );

        if status == machine.status {
            debug!(instance = instance, "Instance present, status up to date");
            return Ok(Requeue::Never);
        }

        if machine.status.instance_id != instance {
            info!(
                instance = instance,
                previous = %machine.status.instance_id,
                "Recording instance in status"
            );
        }
        machine.status = status;
        self.store.update_status(&machine).await?;
        Ok(Requeue::Never)
    }

    async fn delete(
        &self,
        ctx: &Context,
        machine: IncusMachine,
        instance: &str,
    ) -> Result<Requeue, ReconcileError> {
        info!(instance = instance, "Deleting Incus VM instance");

        if let Err(e) = self.backend.delete_instance(ctx, instance).await {
            error!(instance = instance, error = %e, "Failed to delete Incus instance");
            return Err(self.fail(machine, e.into()).await);
        }

        // The finalizer goes only once absence is observed.
        match self.backend.instance_exists(ctx, instance).await {
            Ok(false) => {}
            Ok(true) => {
                let err = ReconcileError::DeleteUnconfirmed {
                    instance: instance.to_string(),
                };
                error!(instance = instance, error = %err, "Deleted instance still observed");
                return Err(self.fail(machine, err).await);
            }
            Err(e) => {
                error!(instance = instance, error = %e, "Failed to confirm instance deletion");
                return Err(self.fail(machine, e.into()).await);
            }
        }

        info!(instance = instance, "Deleted Incus VM instance");
        self.remove_finalizer(machine).await
    }

    async fn remove_finalizer(&self, mut machine: IncusMachine) -> Result<Requeue, ReconcileError> {
        if finalizer::remove_marker(&mut machine, MACHINE_FINALIZER) {
            self.store.update(&machine).await?;
            info!("Removed finalizer");
        }
        Ok(Requeue::Never)
    }

    /// Record a non-ready condition for `err` and hand the error back.
    ///
    /// Only conditions are written; a failed status write is logged and the
    /// original error still wins.
    async fn fail(&self, mut machine: IncusMachine, err: ReconcileError) -> ReconcileError {
        let changed = set_condition(
            &mut machine.status.conditions,
            Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                err.reason(),
                err.to_string(),
            )
            .with_generation(machine.metadata.generation),
        );

        if changed {
            if let Err(store_err) = self.store.update_status(&machine).await {
                warn!(error = %store_err, "Failed to record failure condition");
            }
        }
        err
    }
}

#[async_trait]
impl Reconciler for MachineReconciler {
    type Object = IncusMachine;

    async fn reconcile(&self, ctx: &Context, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        self.reconcile_machine(ctx, key).await
    }
}
