//! In-memory backend for tests and development.
//!
//! Records every call and supports fault injection, including the partial
//! effects a real daemon can leave behind when an operation fails midway.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use capi_incus_reconcile::Context;
use tracing::{debug, info};

use super::{BackendError, InstanceBackend, InstanceRequest};

/// A call made against the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Connect,
    Create(InstanceRequest),
    Delete(String),
    Exists(String),
    Close,
}

/// Failure switches. All default to off.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// `connect` and every operation fail with a connection error.
    pub connect: bool,
    /// `create_instance` fails.
    pub create: bool,
    /// With `create`: the instance is left behind despite the failure.
    pub create_leaves_instance: bool,
    /// `create_instance` reports success but nothing is created.
    pub create_without_effect: bool,
    /// `delete_instance` fails.
    pub delete: bool,
    /// With `delete`: the instance is removed despite the failure.
    pub delete_removes_instance: bool,
    /// `instance_exists` fails.
    pub exists: bool,
}

/// Mock backend holding instances in memory.
#[derive(Default)]
pub struct MockBackend {
    instances: Mutex<BTreeMap<String, InstanceRequest>>,
    calls: Mutex<Vec<BackendCall>>,
    faults: Mutex<Faults>,
    connected: Mutex<bool>,
}

impl MockBackend {
    /// Create an empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend with the given faults enabled.
    pub fn with_faults(faults: Faults) -> Self {
        let backend = Self::new();
        backend.set_faults(faults);
        backend
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner()) = faults;
    }

    pub fn clear_faults(&self) {
        self.set_faults(Faults::default());
    }

    /// Put an instance in place as if created out of band.
    pub fn insert_instance(&self, name: &str) {
        let request = InstanceRequest {
            name: name.to_string(),
            image: String::new(),
            cpus: 0,
            memory_mib: 0,
            root_disk_size_gib: None,
        };
        self.instances_mut().insert(name.to_string(), request);
    }

    /// Remove an instance as if deleted out of band.
    pub fn remove_instance(&self, name: &str) -> bool {
        self.instances_mut().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances_mut().contains_key(name)
    }

    /// The request an instance was created with.
    pub fn instance(&self, name: &str) -> Option<InstanceRequest> {
        self.instances_mut().get(name).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.instances_mut().len()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Create and delete calls only.
    pub fn mutating_calls(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::Create(_) | BackendCall::Delete(_)))
            .collect()
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Create(_)))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Delete(_)))
            .count()
    }

    fn instances_mut(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, InstanceRequest>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> Faults {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BackendCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    /// Shared preamble: honour the context and the connection fault.
    fn check(&self, ctx: &Context) -> Result<(), BackendError> {
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }
        if self.faults().connect {
            return Err(BackendError::Connection("[MOCK] daemon unreachable".to_string()));
        }
        *self.connected.lock().unwrap_or_else(|e| e.into_inner()) = true;
        Ok(())
    }
}

#[async_trait]
impl InstanceBackend for MockBackend {
    async fn connect(&self, ctx: &Context) -> Result<(), BackendError> {
        self.record(BackendCall::Connect);
        self.check(ctx)
    }

    async fn create_instance(
        &self,
        ctx: &Context,
        request: &InstanceRequest,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::Create(request.clone()));
        self.check(ctx)?;
        let faults = self.faults();

        info!(
            instance = %request.name,
            image = %request.image,
            cpus = request.cpus,
            memory_mib = request.memory_mib,
            "[MOCK] Creating instance"
        );

        if faults.create {
            if faults.create_leaves_instance {
                self.instances_mut()
                    .insert(request.name.clone(), request.clone());
            }
            return Err(BackendError::Create {
                name: request.name.clone(),
                reason: "[MOCK] provisioning failed".to_string(),
            });
        }
        if faults.create_without_effect {
            return Ok(());
        }

        let mut instances = self.instances_mut();
        if instances.contains_key(&request.name) {
            return Err(BackendError::Create {
                name: request.name.clone(),
                reason: "[MOCK] instance already exists".to_string(),
            });
        }
        instances.insert(request.name.clone(), request.clone());
        Ok(())
    }

    async fn delete_instance(&self, ctx: &Context, name: &str) -> Result<(), BackendError> {
        self.record(BackendCall::Delete(name.to_string()));
        self.check(ctx)?;
        let faults = self.faults();

        info!(instance = name, "[MOCK] Deleting instance");

        if faults.delete {
            if faults.delete_removes_instance {
                self.instances_mut().remove(name);
            }
            return Err(BackendError::Delete {
                name: name.to_string(),
                reason: "[MOCK] deletion failed".to_string(),
            });
        }

        if self.instances_mut().remove(name).is_none() {
            return Err(BackendError::Delete {
                name: name.to_string(),
                reason: "[MOCK] instance not found".to_string(),
            });
        }
        Ok(())
    }

    async fn instance_exists(&self, ctx: &Context, name: &str) -> Result<bool, BackendError> {
        self.record(BackendCall::Exists(name.to_string()));
        self.check(ctx)?;

        if self.faults().exists {
            return Err(BackendError::Query {
                name: name.to_string(),
                reason: "[MOCK] query failed".to_string(),
            });
        }

        let exists = self.contains(name);
        debug!(instance = name, exists, "[MOCK] Checked instance");
        Ok(exists)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.record(BackendCall::Close);
        *self.connected.lock().unwrap_or_else(|e| e.into_inner()) = false;
        Ok(())
    }
}
