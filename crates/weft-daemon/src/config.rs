//! Daemon configuration file handling.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use weft_mesh::MeshConfig;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Mesh engine knobs (all optional; spec defaults otherwise).
    #[serde(default)]
    pub mesh: MeshConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A peer to dial at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPeer {
    /// The peer's mesh address (64 hex chars).
    pub peer_id: String,
    /// The peer's TCP listener, `host:port`.
    pub address: String,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP listen port. 0 = OS-assigned ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Peers to dial at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<BootstrapPeer>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = `$WEFT_DATA_DIR` or `./weft-data`.
    #[serde(default)]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
        }
    }
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display name for a freshly generated identity.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_display_name() -> String {
    "weft-node".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load the configuration from `path`, or defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// The effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        if !self.storage.data_dir.is_empty() {
            return PathBuf::from(&self.storage.data_dir);
        }
        if let Ok(dir) = std::env::var("WEFT_DATA_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        PathBuf::from("./weft-data")
    }
}
