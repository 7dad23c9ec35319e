//! Incus implementation of `InstanceBackend`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use capi_incus_reconcile::Context;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::api::{ApiError, IncusApi};
use super::types::InstancesPost;
use crate::backend::{BackendError, InstanceBackend, InstanceRequest};

/// Default location of the Incus daemon socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/incus/unix.socket";

/// Lazily connected session to an Incus daemon.
///
/// The session is shared; concurrent reconciles issue independent requests
/// over the same connection pool.
pub struct IncusClient {
    socket_path: PathBuf,
    session: RwLock<Option<Arc<IncusApi>>>,
}

impl IncusClient {
    /// Create a client for the given socket. Nothing is dialled until `connect`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            session: RwLock::new(None),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Connect if needed and return the live session.
    async fn session(&self, ctx: &Context) -> Result<Arc<IncusApi>, BackendError> {
        self.connect(ctx).await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| BackendError::Connection("session closed concurrently".to_string()))
    }
}

fn create_error(name: &str, stage: &str, err: ApiError) -> BackendError {
    BackendError::Create {
        name: name.to_string(),
        reason: format!("{stage}: {err}"),
    }
}

fn delete_error(name: &str, stage: &str, err: ApiError) -> BackendError {
    BackendError::Delete {
        name: name.to_string(),
        reason: format!("{stage}: {err}"),
    }
}

#[async_trait]
impl InstanceBackend for IncusClient {
    async fn connect(&self, ctx: &Context) -> Result<(), BackendError> {
        if self.session.read().await.is_some() {
            return Ok(());
        }

        let mut session = self.session.write().await;
        if session.is_some() {
            return Ok(());
        }

        let api = IncusApi::new(&self.socket_path);
        if !api.socket_exists() {
            return Err(BackendError::Connection(
                ApiError::SocketNotFound(self.socket_path.display().to_string()).to_string(),
            ));
        }

        let server = ctx
            .run(api.server_info())
            .await?
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        info!(
            socket = %self.socket_path.display(),
            api_version = %server.api_version,
            auth = %server.auth,
            "Connected to Incus"
        );
        *session = Some(Arc::new(api));
        Ok(())
    }

    async fn create_instance(
        &self,
        ctx: &Context,
        request: &InstanceRequest,
    ) -> Result<(), BackendError> {
        let api = self.session(ctx).await?;
        let body = InstancesPost::virtual_machine(request);

        debug!(
            instance = %request.name,
            alias = %body.source.alias,
            server = ?body.source.server,
            "Submitting instance creation"
        );

        let operation = ctx
            .run(api.create_instance(&body))
            .await?
            .map_err(|e| create_error(&request.name, "request rejected", e))?;

        ctx.run(api.wait_operation(&operation))
            .await?
            .map_err(|e| create_error(&request.name, "provisioning failed", e))?;

        Ok(())
    }

    async fn delete_instance(&self, ctx: &Context, name: &str) -> Result<(), BackendError> {
        let api = self.session(ctx).await?;

        let state = ctx
            .run(api.get_instance_state(name))
            .await?
            .map_err(|e| delete_error(name, "reading state", e))?;

        // Incus refuses to delete a running instance.
        if !state.is_stopped() {
            debug!(instance = name, status = %state.status, "Force-stopping instance before delete");
            let operation = ctx
                .run(api.force_stop_instance(name))
                .await?
                .map_err(|e| delete_error(name, "stop rejected", e))?;
            ctx.run(api.wait_operation(&operation))
                .await?
                .map_err(|e| delete_error(name, "stop failed", e))?;
        }

        let operation = ctx
            .run(api.delete_instance(name))
            .await?
            .map_err(|e| delete_error(name, "request rejected", e))?;
        ctx.run(api.wait_operation(&operation))
            .await?
            .map_err(|e| delete_error(name, "deletion failed", e))?;

        Ok(())
    }

    async fn instance_exists(&self, ctx: &Context, name: &str) -> Result<bool, BackendError> {
        let api = self.session(ctx).await?;

        match ctx.run(api.get_instance(name)).await? {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(BackendError::Query {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.session.write().await.take().is_some() {
            debug!(socket = %self.socket_path.display(), "Closed Incus session");
        }
        Ok(())
    }
}
