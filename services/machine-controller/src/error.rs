//! Error types for reconcilers.

use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

/// Why a reconcile was left unresolved.
///
/// Every variant is retried by redelivery of the reconcile request.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    /// Create reported success but the instance could not be observed.
    #[error("instance {instance} not found after create reported success")]
    CreateUnconfirmed { instance: String },

    /// Delete reported success but the instance is still observed.
    #[error("instance {instance} still present after delete reported success")]
    DeleteUnconfirmed { instance: String },
}

impl ReconcileError {
    /// Condition reason recorded on the object for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Backend(e) => e.reason_code(),
            ReconcileError::Store(_) => "StoreWriteFailed",
            ReconcileError::CreateUnconfirmed { .. } | ReconcileError::DeleteUnconfirmed { .. } => {
                "InstanceUnconfirmed"
            }
        }
    }

    /// False only for shutdown cancellation; everything else is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Backend(e) => e.is_retryable(),
            _ => true,
        }
    }
}
