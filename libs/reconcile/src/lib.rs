//! Reconciliation loop primitives.
//!
//! This library provides the kind-agnostic pieces every reconciler in the
//! workspace is built from:
//!
//! - **Object identity**: [`ObjectMeta`], [`ObjectKey`] and the [`Resource`]
//!   trait that declarative kinds implement.
//! - **Finalizers**: the marker protocol that holds an object in the store
//!   until its backend resources are gone.
//! - **Conditions**: append/replace observation records on object status.
//! - **Cancellation**: a [`Context`] carrying a cancel signal and deadline
//!   through every backend call.
//!
//! # Invariants
//!
//! - All reconcile steps are idempotent
//! - Decisions are deterministic given the same object and observation
//! - A finalizer is only removed once backend cleanup is confirmed

use std::time::Duration;

pub mod condition;
pub mod context;
pub mod finalizer;
pub mod meta;

pub use condition::{set_condition, Condition, ConditionStatus};
pub use context::{Context, Interrupted};
pub use meta::{ObjectKey, ObjectMeta, Resource};

/// What the caller should do with a key after a reconcile returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing more to do until the next change or periodic resync.
    Never,

    /// Run the reconcile again right away.
    Immediate,

    /// Run the reconcile again after a delay.
    After(Duration),
}

impl Requeue {
    /// Returns true if the key should be reconciled again without waiting.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Returns true if no follow-up is requested.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Never)
    }
}

/// Default periodic resync interval.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on immediate requeues of one key within a single pass.
pub const MAX_IMMEDIATE_REQUEUES: u32 = 5;
