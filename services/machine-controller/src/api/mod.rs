//! Declarative object kinds reconciled by this controller.
//!
//! Objects are persisted by an external store and reach the controller as
//! plain data; the controller only ever mutates `status` and `finalizers`.

pub mod cluster;
pub mod machine;

pub use cluster::{IncusCluster, IncusClusterSpec, IncusClusterStatus};
pub use machine::{IncusMachine, IncusMachineSpec, IncusMachineStatus};

