//! Configuration for the machine controller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::backend::incus::DEFAULT_SOCKET_PATH;

/// Machine controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Incus daemon's unix socket.
    pub incus_socket: PathBuf,

    /// Data directory for the object store.
    pub data_dir: PathBuf,

    /// Interval between full reconcile passes, in seconds.
    pub resync_interval_secs: u64,

    /// Deadline for a single reconcile, in seconds.
    pub reconcile_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let incus_socket = lookup("INCUS_SOCKET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());

        let data_dir = lookup("CAPI_INCUS_DATA_DIR")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/var/lib/capi-incus".to_string());

        let resync_interval_secs = parse_secs(&lookup, "CAPI_INCUS_RESYNC_INTERVAL", 30)?;
        let reconcile_timeout_secs = parse_secs(&lookup, "CAPI_INCUS_RECONCILE_TIMEOUT", 600)?;

        let log_level = lookup("CAPI_INCUS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            incus_socket: PathBuf::from(incus_socket),
            data_dir: PathBuf::from(data_dir),
            resync_interval_secs,
            reconcile_timeout_secs,
            log_level,
        })
    }

    /// Location of the SQLite object store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("objects.db")
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?;
    anyhow::ensure!(secs > 0, "{key} must be greater than zero");
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.incus_socket, PathBuf::from("/var/lib/incus/unix.socket"));
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/capi-incus/objects.db"));
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(600));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("INCUS_SOCKET", "/run/incus.sock"),
            ("CAPI_INCUS_DATA_DIR", "/tmp/capi"),
            ("CAPI_INCUS_RESYNC_INTERVAL", "5"),
            ("CAPI_INCUS_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.incus_socket, PathBuf::from("/run/incus.sock"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/capi"));
        assert_eq!(config.resync_interval_secs, 5);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_interval_rejected() {
        assert!(Config::from_lookup(lookup(&[("CAPI_INCUS_RESYNC_INTERVAL", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CAPI_INCUS_RECONCILE_TIMEOUT", "0")])).is_err());
    }
}
