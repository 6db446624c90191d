//! Appliance API Types
//!
//! Wire types for the appliance's REST surface (`/api/v2.0`). Read types are
//! lenient (`#[serde(default)]`) because the appliance adds fields between
//! releases; request types only carry what this engine sends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Redundancy
// =============================================================================

/// Vdev redundancy layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VdevType {
    /// Single disk (or plain stripe), no redundancy
    #[serde(alias = "stripe", alias = "single")]
    Stripe,
    #[serde(alias = "mirror")]
    Mirror,
    #[serde(alias = "raidz1", alias = "raidz")]
    Raidz1,
    #[serde(alias = "raidz2")]
    Raidz2,
    #[serde(alias = "raidz3")]
    Raidz3,
}

impl VdevType {
    /// Number of disks that may fail without data loss
    pub fn fault_tolerance(&self) -> usize {
        match self {
            VdevType::Stripe => 0,
            VdevType::Mirror => 1,
            VdevType::Raidz1 => 1,
            VdevType::Raidz2 => 2,
            VdevType::Raidz3 => 3,
        }
    }
}

impl fmt::Display for VdevType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VdevType::Stripe => write!(f, "stripe"),
            VdevType::Mirror => write!(f, "mirror"),
            VdevType::Raidz1 => write!(f, "raidz1"),
            VdevType::Raidz2 => write!(f, "raidz2"),
            VdevType::Raidz3 => write!(f, "raidz3"),
        }
    }
}

impl FromStr for VdevType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" | "single" => Ok(VdevType::Stripe),
            "mirror" => Ok(VdevType::Mirror),
            "raidz" | "raidz1" => Ok(VdevType::Raidz1),
            "raidz2" => Ok(VdevType::Raidz2),
            "raidz3" => Ok(VdevType::Raidz3),
            other => Err(format!("unknown redundancy level: {}", other)),
        }
    }
}

// =============================================================================
// System
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    pub version: String,
    pub hostname: String,
    pub model: Option<String>,
    pub physmem: u64,
    pub cores: u32,
    pub uptime_seconds: f64,
}

// =============================================================================
// Pools
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pool {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub status: String,
    pub healthy: bool,
    pub size: Option<u64>,
    pub allocated: Option<u64>,
    pub free: Option<u64>,
    pub topology: PoolTopology,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolTopology {
    pub data: Vec<Vdev>,
}

/// A vdev as reported by the appliance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vdev {
    #[serde(rename = "type")]
    pub vdev_type: String,
    pub status: Option<String>,
    pub disk: Option<String>,
    pub children: Vec<Vdev>,
}

impl Vdev {
    /// Disk names backing this vdev
    pub fn disks(&self) -> Vec<String> {
        if self.children.is_empty() {
            return self.disk.iter().cloned().collect();
        }
        self.children.iter().flat_map(|c| c.disks()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub name: String,
    pub topology: CreatePoolTopology,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePoolTopology {
    pub data: Vec<VdevSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdevSpec {
    #[serde(rename = "type")]
    pub vdev_type: VdevType,
    pub disks: Vec<String>,
}

impl CreatePoolRequest {
    /// A pool with one data vdev spanning `disks`
    pub fn single_vdev(name: impl Into<String>, vdev_type: VdevType, disks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            topology: CreatePoolTopology {
                data: vec![VdevSpec { vdev_type, disks }],
            },
        }
    }
}

// =============================================================================
// Datasets
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetType {
    Filesystem,
    Volume,
}

/// A ZFS property as returned by the appliance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyValue {
    pub value: Option<String>,
    pub rawvalue: Option<String>,
    pub parsed: Option<serde_json::Value>,
}

impl PropertyValue {
    pub fn as_bytes(&self) -> Option<u64> {
        if let Some(n) = self.parsed.as_ref().and_then(|v| v.as_u64()) {
            return Some(n);
        }
        self.rawvalue.as_deref().and_then(|raw| raw.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pool: String,
    #[serde(rename = "type")]
    pub dataset_type: DatasetType,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub used: Option<PropertyValue>,
    #[serde(default)]
    pub available: Option<PropertyValue>,
    #[serde(default)]
    pub volsize: Option<PropertyValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDatasetRequest {
    /// Full name, `<pool>/<path>`
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<DatasetType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volsize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

// =============================================================================
// NFS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NfsShare {
    pub id: u64,
    pub path: String,
    pub comment: String,
    pub enabled: bool,
    pub networks: Vec<String>,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNfsShareRequest {
    pub path: String,
    pub comment: String,
    pub networks: Vec<String>,
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maproot_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maproot_group: Option<String>,
}

// =============================================================================
// iSCSI
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalListen {
    pub ip: String,
    #[serde(default = "default_iscsi_port")]
    pub port: u16,
}

fn default_iscsi_port() -> u16 {
    3260
}

impl PortalListen {
    pub fn is_wildcard(&self) -> bool {
        is_wildcard_ip(&self.ip)
    }
}

pub fn is_wildcard_ip(ip: &str) -> bool {
    matches!(ip, "0.0.0.0" | "::" | "[::]")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiPortal {
    pub id: u64,
    pub tag: u64,
    pub comment: String,
    pub listen: Vec<PortalListen>,
}

impl IscsiPortal {
    /// Whether this portal already accepts connections on `ip:port`.
    ///
    /// A wildcard listen address covers every IP on the same port.
    pub fn listens_on(&self, ip: &str, port: u16) -> bool {
        self.listen
            .iter()
            .any(|l| l.port == port && (l.is_wildcard() || l.ip == ip))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePortalRequest {
    pub comment: String,
    pub listen: Vec<PortalListen>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiInitiatorGroup {
    pub id: u64,
    pub tag: u64,
    pub comment: String,
    pub initiators: Vec<String>,
}

impl IscsiInitiatorGroup {
    /// An empty initiator list admits every initiator
    pub fn allows_all(&self) -> bool {
        self.initiators.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInitiatorGroupRequest {
    pub comment: String,
    pub initiators: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetGroup {
    pub portal: u64,
    pub initiator: Option<u64>,
    pub authmethod: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiTarget {
    pub id: u64,
    pub name: String,
    pub alias: Option<String>,
    pub mode: String,
    pub groups: Vec<TargetGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub mode: String,
    pub groups: Vec<TargetGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiExtent {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub extent_type: String,
    pub disk: Option<String>,
    pub path: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExtentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub extent_type: String,
    /// `zvol/<pool>/<volume>` for disk extents
    pub disk: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiTargetExtent {
    pub id: u64,
    pub target: u64,
    pub extent: u64,
    pub lunid: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTargetExtentRequest {
    pub target: u64,
    pub extent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lunid: Option<u32>,
}

// =============================================================================
// Services
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceState {
    Running,
    Stopped,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: u64,
    pub service: String,
    #[serde(default)]
    pub enable: bool,
    pub state: ServiceState,
}

impl Service {
    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }
}

pub const NFS_SERVICE: &str = "nfs";
pub const ISCSI_SERVICE: &str = "iscsitarget";

// =============================================================================
// Disks
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceDisk {
    pub identifier: String,
    pub name: String,
    pub serial: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub disk_type: Option<String>,
    pub pool: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vdev_type_wire_format() {
        assert_eq!(serde_json::to_string(&VdevType::Raidz2).unwrap(), "\"RAIDZ2\"");
        let parsed: VdevType = serde_json::from_str("\"MIRROR\"").unwrap();
        assert_eq!(parsed, VdevType::Mirror);
        let parsed: VdevType = serde_yaml::from_str("raidz1").unwrap();
        assert_eq!(parsed, VdevType::Raidz1);
        assert_eq!("STRIPE".parse::<VdevType>().unwrap(), VdevType::Stripe);
        assert!("raid5".parse::<VdevType>().is_err());
    }

    #[test]
    fn test_create_pool_request_shape() {
        let request = CreatePoolRequest::single_vdev(
            "tank",
            VdevType::Mirror,
            vec!["sda".into(), "sdb".into()],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "tank");
        assert_eq!(json["topology"]["data"][0]["type"], "MIRROR");
        assert_eq!(json["topology"]["data"][0]["disks"][1], "sdb");
    }

    #[test]
    fn test_pool_decodes_nested_topology() {
        let pool: Pool = serde_json::from_str(
            r#"{
                "id": 1, "name": "tank", "status": "ONLINE", "healthy": true,
                "topology": {"data": [{"type": "MIRROR", "children": [
                    {"type": "DISK", "disk": "sda"},
                    {"type": "DISK", "disk": "sdb"}
                ]}]},
                "unknown_field": 42
            }"#,
        )
        .unwrap();
        assert_eq!(pool.topology.data[0].vdev_type, "MIRROR");
        assert_eq!(pool.topology.data[0].disks(), vec!["sda", "sdb"]);
    }

    #[test]
    fn test_portal_listens_on() {
        let wildcard = IscsiPortal {
            listen: vec![PortalListen {
                ip: "0.0.0.0".into(),
                port: 3260,
            }],
            ..Default::default()
        };
        assert!(wildcard.listens_on("10.0.0.5", 3260));
        assert!(!wildcard.listens_on("10.0.0.5", 3261));

        let specific = IscsiPortal {
            listen: vec![PortalListen {
                ip: "10.0.0.5".into(),
                port: 3260,
            }],
            ..Default::default()
        };
        assert!(specific.listens_on("10.0.0.5", 3260));
        assert!(!specific.listens_on("10.0.0.6", 3260));
        assert!(!specific.listens_on("0.0.0.0", 3260));
    }

    #[test]
    fn test_dataset_capacity_properties() {
        let dataset: Dataset = serde_json::from_str(
            r#"{
                "id": "tank/k8s", "name": "tank/k8s", "pool": "tank",
                "type": "FILESYSTEM", "mountpoint": "/mnt/tank/k8s",
                "used": {"value": "96K", "rawvalue": "98304", "parsed": 98304},
                "available": {"value": "1T", "rawvalue": "1099511627776", "parsed": null}
            }"#,
        )
        .unwrap();
        assert_eq!(dataset.used.unwrap().as_bytes(), Some(98304));
        assert_eq!(dataset.available.unwrap().as_bytes(), Some(1_099_511_627_776));
    }

    #[test]
    fn test_service_state_tolerates_unknown() {
        let service: Service =
            serde_json::from_str(r#"{"id": 4, "service": "nfs", "enable": false, "state": "CRASHED"}"#)
                .unwrap();
        assert_eq!(service.state, ServiceState::Unknown);
        assert!(!service.is_running());
    }
}
