//! Incus HTTP API client.
//!
//! This module provides an HTTP client for the Incus daemon's unix socket
//! API. Mutating endpoints return background operations which are awaited
//! through the operation wait endpoint.
//!
//! Reference: https://linuxcontainers.org/incus/docs/main/rest-api-spec/

use std::path::{Path, PathBuf};

use hyper::http::uri::PathAndQuery;
use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use super::types::{
    Envelope, InstanceState, InstanceStatePut, InstancesPost, Operation, OperationMetadata,
    ServerInfo,
};

/// Errors from the Incus API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("operation {operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("socket not found: {0}")]
    SocketNotFound(String),

    #[error("invalid instance name {0:?}")]
    InvalidName(String),
}

impl ApiError {
    /// Returns true if the daemon reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Api { status: 404, .. })
    }
}

/// Incus API client for unix socket communication.
pub struct IncusApi {
    socket_path: PathBuf,
    client: Client<UnixConnector>,
}

impl IncusApi {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            client: Client::unix(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Fetch server information. Doubles as the session handshake.
    pub async fn server_info(&self) -> Result<ServerInfo, ApiError> {
        let envelope = self.request::<()>(Method::GET, "/1.0", None).await?;
        Ok(serde_json::from_value(envelope.metadata)?)
    }

    /// Fetch an instance's configuration. Fails with a 404 `Api` error if absent.
    pub async fn get_instance(&self, name: &str) -> Result<serde_json::Value, ApiError> {
        let path = instance_path(name, "")?;
        let envelope = self.request::<()>(Method::GET, &path, None).await?;
        Ok(envelope.metadata)
    }

    /// Fetch an instance's runtime state.
    pub async fn get_instance_state(&self, name: &str) -> Result<InstanceState, ApiError> {
        let path = instance_path(name, "/state")?;
        let envelope = self.request::<()>(Method::GET, &path, None).await?;
        Ok(serde_json::from_value(envelope.metadata)?)
    }

    /// Start instance creation.
    pub async fn create_instance(&self, body: &InstancesPost) -> Result<Operation, ApiError> {
        validate_instance_name(&body.name)?;
        let envelope = self
            .request(Method::POST, "/1.0/instances", Some(body))
            .await?;
        Self::operation(envelope)
    }

    /// Start a forced stop of a running instance.
    pub async fn force_stop_instance(&self, name: &str) -> Result<Operation, ApiError> {
        let path = instance_path(name, "/state")?;
        let envelope = self
            .request(Method::PUT, &path, Some(&InstanceStatePut::force_stop()))
            .await?;
        Self::operation(envelope)
    }

    /// Start instance deletion. The instance must be stopped.
    pub async fn delete_instance(&self, name: &str) -> Result<Operation, ApiError> {
        let path = instance_path(name, "")?;
        let envelope = self.request::<()>(Method::DELETE, &path, None).await?;
        Self::operation(envelope)
    }

    /// Block until the operation finishes, failing if it did not succeed.
    pub async fn wait_operation(&self, operation: &Operation) -> Result<(), ApiError> {
        let path = format!("{}/wait", operation.url);
        let envelope = self.request::<()>(Method::GET, &path, None).await?;
        let metadata: OperationMetadata = serde_json::from_value(envelope.metadata)?;

        if metadata.succeeded() {
            debug!(operation = %operation.url, "Incus operation succeeded");
            Ok(())
        } else {
            let message = if metadata.err.is_empty() {
                metadata.status
            } else {
                metadata.err
            };
            Err(ApiError::Operation {
                operation: operation.url.clone(),
                message,
            })
        }
    }

    fn operation(envelope: Envelope) -> Result<Operation, ApiError> {
        if envelope.kind != "async" || envelope.operation.is_empty() {
            return Err(ApiError::Unexpected(format!(
                "expected async response, got {}",
                envelope.kind
            )));
        }
        Ok(Operation {
            url: envelope.operation,
        })
    }

    /// Perform a request and unwrap the response envelope.
    async fn request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<Envelope, ApiError> {
        // `Uri::new` panics on an unparsable path.
        if !path.starts_with('/') || path.parse::<PathAndQuery>().is_err() {
            return Err(ApiError::Unexpected(format!("invalid request path {path:?}")));
        }
        let uri = Uri::new(&self.socket_path, path);

        debug!(method = %method, path = path, "Request to Incus API");

        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;
        let envelope: Envelope = match serde_json::from_reader(body.reader()) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(ApiError::Api {
                    status: status.as_u16(),
                    message: status.to_string(),
                })
            }
        };

        if envelope.kind == "error" || !status.is_success() {
            let code = if envelope.error_code != 0 {
                envelope.error_code
            } else {
                status.as_u16()
            };
            if code != 404 {
                error!(status = code, message = %envelope.error, path = path, "Incus API error");
            }
            return Err(ApiError::Api {
                status: code,
                message: envelope.error,
            });
        }

        Ok(envelope)
    }
}

/// Check `name` against the Incus instance naming rules: a hostname label
/// of letters, digits and hyphens, not purely numeric.
pub fn validate_instance_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.bytes().all(|b| b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidName(name.to_string()))
    }
}

fn instance_path(name: &str, suffix: &str) -> Result<String, ApiError> {
    validate_instance_name(name)?;
    Ok(format!("/1.0/instances/{name}{suffix}"))
}

impl From<hyper::http::Error> for ApiError {
    fn from(err: hyper::http::Error) -> Self {
        ApiError::Unexpected(err.to_string())
    }
}
