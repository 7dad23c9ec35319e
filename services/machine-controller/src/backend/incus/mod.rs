//! Incus daemon backend.
//!
//! Talks to the Incus REST API over its local unix socket and implements
//! `InstanceBackend` for VM instances.
//!
//! ## Components
//!
//! - `api`: HTTP client for the REST endpoints and operation waits
//! - `types`: request/response payloads and image source resolution
//! - `client`: session management and the `InstanceBackend` implementation
//!
//! ## Reference
//!
//! - https://linuxcontainers.org/incus/docs/main/rest-api/

mod api;
mod client;
mod types;

pub use api::{ApiError, IncusApi};
pub use client::{IncusClient, DEFAULT_SOCKET_PATH};
pub use types::{InstanceSource, InstanceState, InstancesPost, Operation, ServerInfo};
