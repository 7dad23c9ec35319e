//! VM backend interface.
//!
//! The machine reconciler only talks to the virtualization daemon through
//! [`InstanceBackend`]:
//! - `connect` / `close` manage the session
//! - `create_instance` / `delete_instance` block until the daemon's own
//!   asynchronous operation completes
//! - `instance_exists` is the only source of truth about backend reality
//!
//! Two implementations are provided: [`IncusClient`] for a real Incus daemon
//! and [`MockBackend`] for tests and development.

use async_trait::async_trait;
use capi_incus_reconcile::{Context, Interrupted};
use thiserror::Error;

pub mod incus;
pub mod mock;

pub use incus::IncusClient;
pub use mock::{BackendCall, Faults, MockBackend};

/// Errors surfaced by a backend.
///
/// "Not found" on an existence check is not an error; it is `Ok(false)`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Daemon unreachable or session handshake failed.
    #[error("failed to connect to Incus: {0}")]
    Connection(String),

    /// Create request rejected or its operation failed. The instance may or
    /// may not exist afterwards.
    #[error("failed to create instance {name}: {reason}")]
    Create { name: String, reason: String },

    /// Delete request rejected or its operation failed. The instance may or
    /// may not exist afterwards.
    #[error("failed to delete instance {name}: {reason}")]
    Delete { name: String, reason: String },

    /// Existence query failed for a reason other than "not found".
    #[error("failed to query instance {name}: {reason}")]
    Query { name: String, reason: String },

    /// The caller's context was cancelled or expired mid-call.
    #[error("backend call interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl BackendError {
    /// Condition reason recorded on the object for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => "BackendUnavailable",
            BackendError::Create { .. } => "InstanceCreateFailed",
            BackendError::Delete { .. } => "InstanceDeleteFailed",
            BackendError::Query { .. } => "InstanceQueryFailed",
            BackendError::Interrupted(_) => "ReconcileInterrupted",
        }
    }

    /// Every backend failure is retried by redelivery except an explicit
    /// cancellation, which only happens on shutdown.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Interrupted(Interrupted::Cancelled))
    }
}

/// Fully resolved parameters for a new VM instance.
///
/// Defaults are applied by the caller before this is built; backends send
/// the values as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub name: String,
    pub image: String,
    pub cpus: u32,
    pub memory_mib: u64,
    /// `None` keeps the backend/profile root disk size.
    pub root_disk_size_gib: Option<u32>,
}

/// Capability set the reconciler needs from a virtualization daemon.
///
/// Implementations must be safe to share across concurrent reconciles of
/// different objects. No call retries internally.
#[async_trait]
pub trait InstanceBackend: Send + Sync {
    /// Establish a session, or reuse the existing one.
    async fn connect(&self, ctx: &Context) -> Result<(), BackendError>;

    /// Create and start a VM, waiting for provisioning to finish.
    async fn create_instance(&self, ctx: &Context, request: &InstanceRequest)
        -> Result<(), BackendError>;

    /// Delete a VM, waiting for the operation to finish.
    ///
    /// Callers check existence first; deleting an absent instance may fail.
    async fn delete_instance(&self, ctx: &Context, name: &str) -> Result<(), BackendError>;

    /// Check whether the named instance currently exists.
    async fn instance_exists(&self, ctx: &Context, name: &str) -> Result<bool, BackendError>;

    /// Release the session. Safe to call when not connected.
    async fn close(&self) -> Result<(), BackendError>;
}
