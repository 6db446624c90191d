//! Domain Ports - Core trait definitions for the storage bootstrap engine
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the storage appliance, the remote command channel, the
//! cluster API, the secret store and the operator's terminal. Adapters
//! implement them; tests substitute in-memory fakes.

use crate::appliance::types::{
    ApplianceDisk, CreateDatasetRequest, CreateExtentRequest, CreateInitiatorGroupRequest,
    CreateNfsShareRequest, CreatePoolRequest, CreatePortalRequest, CreateTargetExtentRequest,
    CreateTargetRequest, Dataset, IscsiExtent, IscsiInitiatorGroup, IscsiPortal, IscsiTarget,
    IscsiTargetExtent, NfsShare, Pool, Service, SystemInfo,
};
use crate::crd::NodeDiskSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Appliance Port
// =============================================================================

/// Typed access to the storage appliance's control plane
#[async_trait]
pub trait ApplianceApi: Send + Sync {
    async fn system_info(&self) -> Result<SystemInfo>;

    // Pools
    async fn list_pools(&self) -> Result<Vec<Pool>>;
    async fn get_pool(&self, id: u64) -> Result<Pool>;
    async fn create_pool(&self, request: CreatePoolRequest) -> Result<Pool>;

    // Datasets
    async fn list_datasets(&self) -> Result<Vec<Dataset>>;
    async fn get_dataset(&self, id: &str) -> Result<Dataset>;
    async fn create_dataset(&self, request: CreateDatasetRequest) -> Result<Dataset>;
    async fn delete_dataset(&self, id: &str) -> Result<()>;

    // NFS shares
    async fn list_nfs_shares(&self) -> Result<Vec<NfsShare>>;
    async fn get_nfs_share(&self, id: u64) -> Result<NfsShare>;
    async fn create_nfs_share(&self, request: CreateNfsShareRequest) -> Result<NfsShare>;
    async fn delete_nfs_share(&self, id: u64) -> Result<()>;

    // iSCSI
    async fn list_iscsi_portals(&self) -> Result<Vec<IscsiPortal>>;
    async fn create_iscsi_portal(&self, request: CreatePortalRequest) -> Result<IscsiPortal>;
    async fn delete_iscsi_portal(&self, id: u64) -> Result<()>;
    async fn list_iscsi_initiators(&self) -> Result<Vec<IscsiInitiatorGroup>>;
    async fn create_iscsi_initiator(
        &self,
        request: CreateInitiatorGroupRequest,
    ) -> Result<IscsiInitiatorGroup>;
    async fn delete_iscsi_initiator(&self, id: u64) -> Result<()>;
    async fn list_iscsi_targets(&self) -> Result<Vec<IscsiTarget>>;
    async fn create_iscsi_target(&self, request: CreateTargetRequest) -> Result<IscsiTarget>;
    async fn delete_iscsi_target(&self, id: u64) -> Result<()>;
    async fn list_iscsi_extents(&self) -> Result<Vec<IscsiExtent>>;
    async fn create_iscsi_extent(&self, request: CreateExtentRequest) -> Result<IscsiExtent>;
    async fn delete_iscsi_extent(&self, id: u64) -> Result<()>;
    async fn list_iscsi_target_extents(&self) -> Result<Vec<IscsiTargetExtent>>;
    async fn create_iscsi_target_extent(
        &self,
        request: CreateTargetExtentRequest,
    ) -> Result<IscsiTargetExtent>;
    async fn delete_iscsi_target_extent(&self, id: u64) -> Result<()>;

    // Services
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn get_service(&self, name: &str) -> Result<Service>;
    async fn enable_service(&self, id: u64) -> Result<()>;
    async fn start_service(&self, name: &str) -> Result<()>;
    async fn stop_service(&self, name: &str) -> Result<()>;

    // Disks
    async fn list_disks(&self) -> Result<Vec<ApplianceDisk>>;
    async fn list_unused_disks(&self) -> Result<Vec<ApplianceDisk>>;
}

// =============================================================================
// Remote Command Port
// =============================================================================

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a `RemoteCommand` error, returning stdout otherwise
    pub fn into_stdout(self, command: &str) -> Result<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(Error::RemoteCommand {
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr,
        })
    }
}

/// One stateful command channel to a host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command line to completion
    async fn execute(&self, command: &str) -> Result<CommandOutput>;
}

// =============================================================================
// Disk Operations Port
// =============================================================================

/// A block device as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel name, e.g. `sdb` or `nvme0n1`
    pub name: String,
    /// Human readable size, e.g. `931.5G`
    pub size: String,
    /// `disk`, `part`, `lvm`, `loop`, ...
    pub device_type: String,
    /// Empty when not mounted
    pub mountpoint: String,
    /// Empty when unformatted
    pub fstype: String,
    /// Parent kernel name, empty for whole disks
    pub parent: String,
}

impl BlockDevice {
    pub fn is_disk(&self) -> bool {
        self.device_type == "disk"
    }

    pub fn is_mounted(&self) -> bool {
        !self.mountpoint.is_empty()
    }
}

/// Device inventory plus the destructive partition/format/mount capability
#[async_trait]
pub trait DiskOperations: Send + Sync {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>>;

    /// Write a fresh partition table with one partition spanning the disk
    async fn create_partition(&self, device: &str) -> Result<()>;

    /// Block until the partition node exists or the attempts run out
    async fn wait_for_device(&self, partition: &str) -> Result<()>;

    async fn format(&self, partition: &str, filesystem: &str) -> Result<()>;

    async fn create_mount_dir(&self, mountpoint: &str) -> Result<()>;

    async fn filesystem_uuid(&self, partition: &str) -> Result<String>;

    async fn has_fstab_entry(&self, mountpoint: &str) -> Result<bool>;

    async fn append_fstab_entry(&self, entry: &str) -> Result<()>;

    async fn mount(&self, mountpoint: &str) -> Result<()>;

    async fn set_permissions(&self, mountpoint: &str) -> Result<()>;
}

// =============================================================================
// Cluster Resource Port
// =============================================================================

/// Read and merge-patch access to a node's storage device map
#[async_trait]
pub trait NodeDiskStore: Send + Sync {
    async fn node_disks(&self, node: &str) -> Result<BTreeMap<String, NodeDiskSpec>>;

    /// Merge `disks` into the node's disk map in a single patch.
    ///
    /// Returns `Error::Cancelled` if `cancel` fires before the patch completes.
    async fn patch_node_disks(
        &self,
        node: &str,
        disks: &BTreeMap<String, NodeDiskSpec>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

// =============================================================================
// Secret Store Port
// =============================================================================

/// Key-value secret storage addressed by logical path
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, path: &str, key: &str) -> Result<Option<String>>;
    async fn write(&self, path: &str, key: &str, value: &str) -> Result<()>;
}

// =============================================================================
// Operator Prompt Port
// =============================================================================

/// Interactive input from the operator
pub trait Prompter: Send + Sync {
    fn read_line(&self, prompt: &str) -> Result<String>;

    /// Ask a yes/no question; only an explicit yes counts
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let answer = self.read_line(prompt)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ApplianceApiRef = Arc<dyn ApplianceApi>;
pub type NodeDiskStoreRef = Arc<dyn NodeDiskStore>;
pub type SecretStoreRef = Arc<dyn SecretStore>;
