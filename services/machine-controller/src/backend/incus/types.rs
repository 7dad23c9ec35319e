//! Incus REST API payloads.
//!
//! These structures map to the subset of the Incus API used for VM
//! lifecycle: the response envelope, operations, instance creation and
//! instance state changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::InstanceRequest;

/// Standard response envelope returned by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    /// `sync`, `async` or `error`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    /// Operation URL for async responses.
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Server information from `GET /1.0`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub api_version: String,
    /// `trusted` for local unix socket clients.
    #[serde(default)]
    pub auth: String,
}

/// A background operation started by an async request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Operation URL, e.g. `/1.0/operations/<uuid>`.
    pub url: String,
}

/// Operation metadata returned by the wait endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OperationMetadata {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub err: String,
}

impl OperationMetadata {
    /// Status code 200 is "Success"; anything else after a wait is terminal.
    pub fn succeeded(&self) -> bool {
        self.status_code == 200
    }
}

/// Runtime state from `GET /1.0/instances/<name>/state`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceState {
    /// e.g. `Running`, `Stopped`, `Frozen`.
    pub status: String,
}

impl InstanceState {
    pub fn is_stopped(&self) -> bool {
        self.status.eq_ignore_ascii_case("stopped")
    }
}

/// Body of `PUT /1.0/instances/<name>/state`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InstanceStatePut {
    pub action: &'static str,
    pub timeout: i64,
    pub force: bool,
}

impl InstanceStatePut {
    pub fn force_stop() -> Self {
        Self {
            action: "stop",
            timeout: 30,
            force: true,
        }
    }
}

/// Image source for a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Well-known simplestreams remotes, by the prefix used in image references.
const REMOTES: &[(&str, &str)] = &[
    ("images", "https://images.linuxcontainers.org"),
    ("ubuntu", "https://cloud-images.ubuntu.com/releases"),
    ("ubuntu-daily", "https://cloud-images.ubuntu.com/daily"),
];

impl InstanceSource {
    /// Resolve an image reference such as `images:ubuntu/24.04`.
    ///
    /// A known remote prefix becomes a simplestreams pull; anything else is
    /// treated as an alias in the daemon's local image store.
    pub fn from_image_ref(image: &str) -> Self {
        if let Some((remote, alias)) = image.split_once(':') {
            if let Some((_, server)) = REMOTES.iter().find(|(name, _)| *name == remote) {
                return Self {
                    kind: "image".to_string(),
                    alias: alias.to_string(),
                    server: Some((*server).to_string()),
                    protocol: Some("simplestreams".to_string()),
                };
            }
        }

        Self {
            kind: "image".to_string(),
            alias: image.to_string(),
            server: None,
            protocol: None,
        }
    }
}

/// Body of `POST /1.0/instances`.
#[derive(Debug, Clone, Serialize)]
pub struct InstancesPost {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: bool,
    pub profiles: Vec<String>,
    pub config: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
    pub source: InstanceSource,
}

impl InstancesPost {
    /// Build a started VM from a resolved request.
    pub fn virtual_machine(request: &InstanceRequest) -> Self {
        let mut config = BTreeMap::new();
        config.insert("limits.cpu".to_string(), request.cpus.to_string());
        config.insert(
            "limits.memory".to_string(),
            format!("{}MiB", request.memory_mib),
        );
        config.insert("security.secureboot".to_string(), "false".to_string());

        let mut devices = BTreeMap::new();
        if let Some(size) = request.root_disk_size_gib {
            let root = BTreeMap::from([
                ("type".to_string(), "disk".to_string()),
                ("pool".to_string(), "default".to_string()),
                ("path".to_string(), "/".to_string()),
                ("size".to_string(), format!("{size}GiB")),
            ]);
            devices.insert("root".to_string(), root);
        }

        Self {
            name: request.name.clone(),
            kind: "virtual-machine".to_string(),
            start: true,
            profiles: vec!["default".to_string()],
            config,
            devices,
            source: InstanceSource::from_image_ref(&request.image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(root_disk_size_gib: Option<u32>) -> InstanceRequest {
        InstanceRequest {
            name: "w1".to_string(),
            image: "images:ubuntu/24.04".to_string(),
            cpus: 2,
            memory_mib: 2048,
            root_disk_size_gib,
        }
    }

    #[test]
    fn test_vm_payload() {
        let body = serde_json::to_value(InstancesPost::virtual_machine(&request(None))).unwrap();
        assert_eq!(body["name"], "w1");
        assert_eq!(body["type"], "virtual-machine");
        assert_eq!(body["start"], true);
        assert_eq!(body["profiles"][0], "default");
        assert_eq!(body["config"]["limits.cpu"], "2");
        assert_eq!(body["config"]["limits.memory"], "2048MiB");
        assert_eq!(body["config"]["security.secureboot"], "false");
        assert!(body.get("devices").is_none());
        assert_eq!(body["source"]["type"], "image");
        assert_eq!(body["source"]["alias"], "ubuntu/24.04");
    }

    #[test]
    fn test_root_disk_override() {
        let body = serde_json::to_value(InstancesPost::virtual_machine(&request(Some(40)))).unwrap();
        let root = &body["devices"]["root"];
        assert_eq!(root["type"], "disk");
        assert_eq!(root["pool"], "default");
        assert_eq!(root["path"], "/");
        assert_eq!(root["size"], "40GiB");
    }

    #[test]
    fn test_image_source_remote() {
        let source = InstanceSource::from_image_ref("images:debian/12");
        assert_eq!(source.alias, "debian/12");
        assert_eq!(source.server.as_deref(), Some("https://images.linuxcontainers.org"));
        assert_eq!(source.protocol.as_deref(), Some("simplestreams"));

        let source = InstanceSource::from_image_ref("ubuntu:24.04");
        assert_eq!(source.alias, "24.04");
        assert_eq!(
            source.server.as_deref(),
            Some("https://cloud-images.ubuntu.com/releases")
        );
    }

    #[test]
    fn test_image_source_local() {
        let source = InstanceSource::from_image_ref("my-golden-image");
        assert_eq!(source.alias, "my-golden-image");
        assert!(source.server.is_none());

        let source = InstanceSource::from_image_ref("elsewhere:thing");
        assert_eq!(source.alias, "elsewhere:thing");
        assert!(source.protocol.is_none());
    }

    #[test]
    fn test_operation_metadata() {
        let ok: OperationMetadata =
            serde_json::from_str(r#"{"status":"Success","status_code":200,"err":""}"#).unwrap();
        assert!(ok.succeeded());

        let failed: OperationMetadata = serde_json::from_str(
            r#"{"status":"Failure","status_code":400,"err":"Failed creating instance record"}"#,
        )
        .unwrap();
        assert!(!failed.succeeded());
        assert_eq!(failed.err, "Failed creating instance record");
    }
}
