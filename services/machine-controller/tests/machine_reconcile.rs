//! Integration tests for the machine reconcile flow.
//!
//! These tests drive `MachineReconciler` against an in-memory store and the
//! mock backend, covering:
//! 1. Finalizer registration before any backend work
//! 2. Creation with defaults and adoption of existing instances
//! 3. Deletion ordering: instance gone before the finalizer is released
//! 4. Failure handling, partial backend effects and redelivery

use std::sync::Arc;

use capi_incus_controller::api::{IncusMachine, IncusMachineSpec};
use capi_incus_controller::backend::{BackendCall, BackendError, Faults, MockBackend};
use capi_incus_controller::store::{MemoryStore, ObjectStore};
use capi_incus_controller::{MachineReconciler, ReconcileError, Reconciler, MACHINE_FINALIZER};
use capi_incus_reconcile::condition::find_condition;
use capi_incus_reconcile::{ConditionStatus, Context, Interrupted, ObjectKey, Requeue};
use tokio::sync::watch;

struct Harness {
    store: Arc<MemoryStore<IncusMachine>>,
    backend: Arc<MockBackend>,
    reconciler: MachineReconciler,
}

impl Harness {
    fn new() -> Self {
        let store: Arc<MemoryStore<IncusMachine>> = Arc::new(MemoryStore::new());
        let backend = Arc::new(MockBackend::new());
        let reconciler = MachineReconciler::new(store.clone(), backend.clone());
        Self {
            store,
            backend,
            reconciler,
        }
    }

    async fn apply(&self, machine: IncusMachine) -> ObjectKey {
        self.store.create(&machine).await.unwrap().metadata.key()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        self.reconciler.reconcile(&Context::background(), key).await
    }

    /// Reconcile until no immediate follow-up is requested.
    async fn converge(&self, key: &ObjectKey) -> Requeue {
        for _ in 0..10 {
            let requeue = self.reconcile(key).await.unwrap();
            if !requeue.is_immediate() {
                return requeue;
            }
        }
        panic!("{key} did not converge");
    }

    async fn get(&self, key: &ObjectKey) -> Option<IncusMachine> {
        self.store.get(key).await.unwrap()
    }

    async fn request_delete(&self, key: &ObjectKey) {
        let held = self.store.delete(key).await.unwrap();
        assert!(held.is_some(), "finalizer should hold {key}");
    }
}

fn machine(name: &str) -> IncusMachine {
    IncusMachine::new("default", name, IncusMachineSpec::default())
}

fn ready(machine: &IncusMachine) -> Option<(ConditionStatus, String)> {
    find_condition(&machine.status.conditions, "Ready").map(|c| (c.status, c.reason.clone()))
}

#[tokio::test]
async fn test_first_reconcile_only_adds_finalizer() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;

    let requeue = h.reconcile(&key).await.unwrap();
    assert_eq!(requeue, Requeue::Immediate);
    assert!(h.backend.calls().is_empty());

    let m = h.get(&key).await.unwrap();
    assert_eq!(m.metadata.finalizers, vec![MACHINE_FINALIZER.to_string()]);
    assert!(m.status.instance_id.is_empty());
}

#[tokio::test]
async fn test_create_with_defaults() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;

    assert_eq!(h.converge(&key).await, Requeue::Never);

    let created = h.backend.instance("w1").expect("instance created");
    assert_eq!(created.image, "images:ubuntu/24.04");
    assert_eq!(created.cpus, 2);
    assert_eq!(created.memory_mib, 2048);
    assert_eq!(created.root_disk_size_gib, None);

    let m = h.get(&key).await.unwrap();
    assert_eq!(m.status.instance_id, "w1");
    assert!(m.metadata.finalizers.contains(&MACHINE_FINALIZER.to_string()));
    assert_eq!(ready(&m), Some((ConditionStatus::True, "InstanceReady".to_string())));

    // The spec itself is never rewritten with defaults.
    assert_eq!(m.spec, IncusMachineSpec::default());
}

#[tokio::test]
async fn test_create_with_explicit_shape() {
    let h = Harness::new();
    let key = h
        .apply(IncusMachine::new(
            "default",
            "cp0",
            IncusMachineSpec {
                image: "images:debian/12".to_string(),
                cpus: 4,
                memory_mib: 8192,
                root_disk_size_gib: 40,
            },
        ))
        .await;

    h.converge(&key).await;

    let created = h.backend.instance("cp0").unwrap();
    assert_eq!(created.image, "images:debian/12");
    assert_eq!(created.cpus, 4);
    assert_eq!(created.memory_mib, 8192);
    assert_eq!(created.root_disk_size_gib, Some(40));
}

#[tokio::test]
async fn test_converged_reconcile_is_a_noop() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.converge(&key).await;

    let before = h.get(&key).await.unwrap();
    h.backend.clear_calls();

    for _ in 0..3 {
        assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);
    }

    assert!(h.backend.mutating_calls().is_empty());
    assert_eq!(h.backend.instance_count(), 1);
    let after = h.get(&key).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_delete_removes_instance_then_finalizer() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.converge(&key).await;
    h.request_delete(&key).await;
    h.backend.clear_calls();

    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);

    assert!(!h.backend.contains("w1"));
    assert_eq!(h.backend.mutating_calls(), vec![BackendCall::Delete("w1".to_string())]);
    // Absence is confirmed before the object is released.
    let calls = h.backend.calls();
    assert_eq!(calls.last(), Some(&BackendCall::Exists("w1".to_string())));
    assert!(h.get(&key).await.is_none());
}

#[tokio::test]
async fn test_failed_delete_keeps_finalizer() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.converge(&key).await;
    h.request_delete(&key).await;

    h.backend.set_faults(Faults {
        delete: true,
        ..Faults::default()
    });
    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Backend(BackendError::Delete { .. })));

    let m = h.get(&key).await.expect("object must be held");
    assert!(m.metadata.finalizers.contains(&MACHINE_FINALIZER.to_string()));
    assert_eq!(m.status.instance_id, "w1");
    assert_eq!(
        ready(&m),
        Some((ConditionStatus::False, "InstanceDeleteFailed".to_string()))
    );
    assert!(h.backend.contains("w1"));

    h.backend.clear_faults();
    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);
    assert!(!h.backend.contains("w1"));
    assert!(h.get(&key).await.is_none());
}

#[tokio::test]
async fn test_delete_failure_with_effect_releases_on_redelivery() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.converge(&key).await;
    h.request_delete(&key).await;

    h.backend.set_faults(Faults {
        delete: true,
        delete_removes_instance: true,
        ..Faults::default()
    });
    assert!(h.reconcile(&key).await.is_err());
    assert!(h.get(&key).await.is_some());

    h.backend.clear_faults();
    h.backend.clear_calls();
    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);

    // Already gone: no second delete.
    assert!(h.backend.mutating_calls().is_empty());
    assert!(h.get(&key).await.is_none());
}

#[tokio::test]
async fn test_delete_of_never_created_instance() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;

    // Finalizer only; the instance was never created.
    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Immediate);
    h.request_delete(&key).await;

    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);
    assert!(h.backend.mutating_calls().is_empty());
    assert!(h.get(&key).await.is_none());
}

#[tokio::test]
async fn test_delete_uses_recorded_instance_name() {
    let h = Harness::new();
    let mut m = machine("w1");
    m.metadata.finalizers.push(MACHINE_FINALIZER.to_string());
    m.status.instance_id = "w1-legacy".to_string();
    let key = h.apply(m).await;
    h.backend.insert_instance("w1-legacy");

    h.request_delete(&key).await;
    h.reconcile(&key).await.unwrap();

    assert_eq!(
        h.backend.mutating_calls(),
        vec![BackendCall::Delete("w1-legacy".to_string())]
    );
    assert!(h.get(&key).await.is_none());
}

#[tokio::test]
async fn test_create_without_effect_is_not_recorded() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.reconcile(&key).await.unwrap();

    h.backend.set_faults(Faults {
        create_without_effect: true,
        ..Faults::default()
    });
    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::CreateUnconfirmed { .. }));

    let m = h.get(&key).await.unwrap();
    assert!(m.status.instance_id.is_empty());
    assert_eq!(
        ready(&m),
        Some((ConditionStatus::False, "InstanceUnconfirmed".to_string()))
    );

    h.backend.clear_faults();
    h.reconcile(&key).await.unwrap();
    let m = h.get(&key).await.unwrap();
    assert_eq!(m.status.instance_id, "w1");
    assert_eq!(h.backend.instance_count(), 1);
}

#[tokio::test]
async fn test_partial_create_is_adopted_on_redelivery() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.reconcile(&key).await.unwrap();

    h.backend.set_faults(Faults {
        create: true,
        create_leaves_instance: true,
        ..Faults::default()
    });
    let err = h.reconcile(&key).await.unwrap_err();
    assert_eq!(err.reason(), "InstanceCreateFailed");
    assert!(h.get(&key).await.unwrap().status.instance_id.is_empty());

    h.backend.clear_faults();
    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);

    assert_eq!(h.backend.create_count(), 1);
    let m = h.get(&key).await.unwrap();
    assert_eq!(m.status.instance_id, "w1");
    assert_eq!(ready(&m), Some((ConditionStatus::True, "InstanceReady".to_string())));
}

#[tokio::test]
async fn test_existing_instance_adopted_after_crash() {
    let h = Harness::new();
    let mut m = machine("w1");
    m.metadata.finalizers.push(MACHINE_FINALIZER.to_string());
    let key = h.apply(m).await;

    // Created by a previous run that died before recording it.
    h.backend.insert_instance("w1");

    assert_eq!(h.reconcile(&key).await.unwrap(), Requeue::Never);
    assert!(h.backend.mutating_calls().is_empty());
    assert_eq!(h.get(&key).await.unwrap().status.instance_id, "w1");
}

#[tokio::test]
async fn test_connection_failure_is_visible() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.reconcile(&key).await.unwrap();

    h.backend.set_faults(Faults {
        connect: true,
        ..Faults::default()
    });
    let err = h.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Backend(BackendError::Connection(_))));

    let m = h.get(&key).await.unwrap();
    assert!(m.status.instance_id.is_empty());
    assert_eq!(
        ready(&m),
        Some((ConditionStatus::False, "BackendUnavailable".to_string()))
    );
    assert_eq!(h.backend.create_count(), 0);

    // Same failure again does not rewrite the object.
    let version = m.metadata.resource_version;
    assert!(h.reconcile(&key).await.is_err());
    assert_eq!(h.get(&key).await.unwrap().metadata.resource_version, version);
}

#[tokio::test]
async fn test_query_failure_blocks_mutation() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.reconcile(&key).await.unwrap();

    h.backend.set_faults(Faults {
        exists: true,
        ..Faults::default()
    });
    let err = h.reconcile(&key).await.unwrap_err();
    assert_eq!(err.reason(), "InstanceQueryFailed");
    assert!(h.backend.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_missing_object_is_done() {
    let h = Harness::new();
    let requeue = h
        .reconcile(&ObjectKey::new("default", "ghost"))
        .await
        .unwrap();
    assert_eq!(requeue, Requeue::Never);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_reconcile_makes_no_changes() {
    let h = Harness::new();
    let key = h.apply(machine("w1")).await;
    h.reconcile(&key).await.unwrap();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let err = h
        .reconciler
        .reconcile(&Context::with_cancel(rx), &key)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Backend(BackendError::Interrupted(Interrupted::Cancelled))
    ));
    assert_eq!(h.backend.instance_count(), 0);
    let m = h.get(&key).await.unwrap();
    assert!(m.status.instance_id.is_empty());
    assert!(m.metadata.finalizers.contains(&MACHINE_FINALIZER.to_string()));
}

#[tokio::test]
async fn test_machines_are_independent() {
    let h = Harness::new();
    let a = h.apply(machine("a")).await;
    let b = h.apply(machine("b")).await;

    h.converge(&a).await;
    h.converge(&b).await;
    h.request_delete(&a).await;
    h.reconcile(&a).await.unwrap();

    assert!(!h.backend.contains("a"));
    assert!(h.backend.contains("b"));
    assert!(h.get(&a).await.is_none());
    assert_eq!(h.get(&b).await.unwrap().status.instance_id, "b");
}
