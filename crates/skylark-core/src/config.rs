//! Configuration system for Skylark gateways.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SKYLARK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/skylark/config.toml
//!   3. ~/.config/skylark/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_MAX_CHUNK_BYTES;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkylarkConfig {
    pub gateway: GatewayConfig,
    pub transfer: TransferConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// `provider:region` this gateway runs in.
    pub region: String,
    /// Address chunk listeners bind to.
    pub bind_host: String,
    /// Control API port (HTTP, loopback only).
    pub api_port: u16,
    /// Chunk listeners started at boot.
    pub initial_servers: u16,
    /// Max chunks processed concurrently. 0 = 4 × available cores.
    pub workers: usize,
    /// Port used for relay hops whose address carries no port.
    pub default_relay_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Per-hop budget for object store calls and for awaiting inbound relay data.
    pub hop_timeout_ms: u64,
    /// Outbound relay connect budget.
    pub connect_timeout_ms: u64,
    /// Idle time between frames before an inbound connection is dropped.
    pub idle_timeout_secs: u64,
    /// Largest payload accepted on the wire.
    pub max_chunk_bytes: u64,
    /// How long a payload that arrived ahead of its request is kept.
    pub inbound_ttl_secs: u64,
    /// Cap on payload bytes held for chunks no worker is waiting on yet.
    pub max_inbound_bytes: u64,
    /// SO_SNDBUF / SO_RCVBUF for chunk sockets. 0 = OS default.
    pub socket_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the local object store.
    pub root: PathBuf,
    /// Bucket receiving chunks whose path ends at this gateway.
    pub local_bucket: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            region: "local:local".to_string(),
            bind_host: "0.0.0.0".to_string(),
            api_port: 8080,
            initial_servers: 1,
            workers: 0,
            default_relay_port: 8100,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            hop_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            idle_timeout_secs: 120,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            inbound_ttl_secs: 300,
            max_inbound_bytes: 1024 * 1024 * 1024,
            socket_buffer_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("objects"),
            local_bucket: "skylark-local".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Worker permits, resolving 0 to a multiple of the core count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 4)
            .unwrap_or(16)
    }
}

impl TransferConfig {
    pub fn hop_timeout(&self) -> Duration {
        Duration::from_millis(self.hop_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn inbound_ttl(&self) -> Duration {
        Duration::from_secs(self.inbound_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("skylark")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("skylark")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SkylarkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            SkylarkConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SKYLARK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SkylarkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SKYLARK_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SKYLARK_GATEWAY__REGION") {
            self.gateway.region = v;
        }
        if let Some(v) = lookup("SKYLARK_GATEWAY__BIND_HOST") {
            self.gateway.bind_host = v;
        }
        if let Some(p) = lookup("SKYLARK_GATEWAY__API_PORT").and_then(|v| v.parse().ok()) {
            self.gateway.api_port = p;
        }
        if let Some(n) = lookup("SKYLARK_GATEWAY__WORKERS").and_then(|v| v.parse().ok()) {
            self.gateway.workers = n;
        }
        if let Some(ms) = lookup("SKYLARK_TRANSFER__HOP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.transfer.hop_timeout_ms = ms;
        }
        if let Some(v) = lookup("SKYLARK_STORAGE__ROOT") {
            self.storage.root = PathBuf::from(v);
        }
    }
}
