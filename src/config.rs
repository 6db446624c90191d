//! Engine Configuration
//!
//! Typed YAML configuration with defaults for every section. CLI flags
//! override individual fields after loading.

use crate::appliance::types::VdevType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Root Configuration
// =============================================================================

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub appliance: ApplianceConfig,
    pub pool: PoolConfig,
    pub dataset: DatasetConfig,
    pub nfs: NfsConfig,
    pub iscsi: IscsiConfig,
    pub provisioner: ProvisionerConfig,
    pub longhorn: LonghornConfig,
    pub secrets: SecretsConfig,
    /// Cluster nodes reachable for disk provisioning, keyed by node name
    pub nodes: BTreeMap<String, NodeTarget>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check the fields the appliance path depends on
    pub fn validate(&self) -> Result<()> {
        if self.appliance.url.trim().is_empty() {
            return Err(Error::Configuration("appliance.url must be set".into()));
        }
        if self.pool.name.trim().is_empty() {
            return Err(Error::Configuration("pool.name must not be empty".into()));
        }
        if self.dataset.name.trim().is_empty() || self.dataset.name.starts_with('/') {
            return Err(Error::Configuration(format!(
                "dataset.name must be a non-empty relative name, got {:?}",
                self.dataset.name
            )));
        }
        if self.pool.min_disks_for_mirror < 2 {
            return Err(Error::Configuration(
                "pool.min_disks_for_mirror must be at least 2".into(),
            ));
        }
        if self.iscsi.enabled && self.iscsi.port == 0 {
            return Err(Error::Configuration("iscsi.port must be non-zero".into()));
        }
        Ok(())
    }

    /// Full dataset id (`<pool>/<dataset>`)
    pub fn dataset_id(&self, pool: &str) -> String {
        format!("{}/{}", pool, self.dataset.name.trim_matches('/'))
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Appliance connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceConfig {
    /// Base URL, e.g. `https://192.168.1.100`
    pub url: String,
    /// API key; falls back to the environment and the secret store
    pub api_key: Option<String>,
    /// Accept self-signed certificates
    pub insecure_skip_verify: bool,
    pub timeout_secs: u64,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            insecure_skip_verify: false,
            timeout_secs: 30,
        }
    }
}

/// Pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub name: String,
    /// Requested redundancy for a newly created pool
    pub redundancy: VdevType,
    /// Below this many unused disks a new pool is a single-disk stripe
    pub min_disks_for_mirror: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "tank".to_string(),
            redundancy: VdevType::Mirror,
            min_disks_for_mirror: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "k8s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NfsConfig {
    pub enabled: bool,
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// iSCSI listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiConfig {
    pub enabled: bool,
    pub listen_ip: String,
    pub port: u16,
    /// Comment attached to portals and initiator groups created here
    pub comment: String,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_ip: "0.0.0.0".to_string(),
            port: 3260,
            comment: "storage-bootstrap".to_string(),
        }
    }
}

/// Remote disk preparation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub filesystem: String,
    /// Mountpoint prefix; the device name is appended
    pub mount_prefix: String,
    /// Prefix privileged commands with `sudo`
    pub use_sudo: bool,
    /// Wait after a partition table change
    pub partition_settle_ms: u64,
    pub device_wait_attempts: u32,
    pub device_wait_interval_ms: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            filesystem: "ext4".to_string(),
            mount_prefix: "/mnt/longhorn-".to_string(),
            use_sudo: true,
            partition_settle_ms: 2000,
            device_wait_attempts: 10,
            device_wait_interval_ms: 1000,
        }
    }
}

/// Filesystems the provisioner can create
pub const SUPPORTED_FILESYSTEMS: [&str; 5] = ["ext2", "ext3", "ext4", "xfs", "btrfs"];

impl ProvisionerConfig {
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_FILESYSTEMS.contains(&self.filesystem.as_str()) {
            return Err(Error::Configuration(format!(
                "provisioner.filesystem must be one of {}, got {:?}",
                SUPPORTED_FILESYSTEMS.join(", "),
                self.filesystem
            )));
        }
        if !self.mount_prefix.starts_with('/') {
            return Err(Error::Configuration(format!(
                "provisioner.mount_prefix must be absolute, got {:?}",
                self.mount_prefix
            )));
        }
        Ok(())
    }
}

/// Longhorn node resource settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LonghornConfig {
    pub namespace: String,
    pub allow_scheduling: bool,
    pub storage_reserved_bytes: u64,
    pub tags: Vec<String>,
}

impl Default for LonghornConfig {
    fn default() -> Self {
        Self {
            namespace: "longhorn-system".to_string(),
            allow_scheduling: true,
            storage_reserved_bytes: 0,
            tags: Vec::new(),
        }
    }
}

/// Where the appliance API key is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub namespace: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            namespace: "storage-system".to_string(),
        }
    }
}

/// SSH target for a cluster node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTarget {
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}
