//! Incus machine controller library.
//!
//! Reconciles declarative `IncusMachine` objects against an Incus daemon so
//! that each machine is backed by exactly one VM instance, and holds every
//! machine in the store until its instance is confirmed gone.
//!
//! ## Architecture
//!
//! ```text
//! Worker (resync tick)
//! └── MachineReconciler
//!     ├── ObjectStore<IncusMachine>  (memory / SQLite)
//!     └── InstanceBackend            (Incus over unix socket / mock)
//! ```
//!
//! ## Modules
//!
//! - `api`: the `IncusMachine` and `IncusCluster` kinds
//! - `backend`: VM backend trait, Incus client and mock
//! - `controller`: reconcilers
//! - `store`: object store trait and adapters
//! - `worker`: periodic reconcile driver

pub mod api;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod store;
pub mod worker;

pub use api::{IncusCluster, IncusMachine};
pub use backend::{InstanceBackend, InstanceRequest, MockBackend};
pub use controller::{ClusterReconciler, MachineReconciler, Reconciler, MACHINE_FINALIZER};
pub use error::ReconcileError;
pub use store::{MemoryStore, ObjectStore, SqliteStore};
pub use worker::{PassSummary, Worker, WorkerConfig};
