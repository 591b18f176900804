use std::path::{Path, PathBuf};

use crate::limits::MAX_CONNECTIONS;
use crate::model::ReservationConfig;

/// Process settings, read from `TABLEBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            policy_file: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: get("TABLEBOOK_BIND").unwrap_or(d.bind),
            port: get("TABLEBOOK_PORT").and_then(|s| s.parse().ok()).unwrap_or(d.port),
            data_dir: get("TABLEBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections: get("TABLEBOOK_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.max_connections)
                .clamp(1, MAX_CONNECTIONS),
            compact_threshold: get("TABLEBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.compact_threshold),
            metrics_port: get("TABLEBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            policy_file: get("TABLEBOOK_POLICY_FILE").map(PathBuf::from),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

/// Load a seed booking policy from a JSON file. Missing fields take defaults.
pub fn load_policy(path: &Path) -> std::io::Result<ReservationConfig> {
    let raw = std::fs::read_to_string(path)?;
    let policy: ReservationConfig = serde_json::from_str(&raw)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    policy
        .validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(policy)
}
