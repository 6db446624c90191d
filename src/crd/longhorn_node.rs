//! Longhorn Node
//!
//! Client-side view of Longhorn's `nodes.longhorn.io` resource. Only the
//! fields this tool reads or patches are modelled; everything else on the
//! live object is left alone because updates go through merge patches.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Disk type Longhorn uses for mounted filesystems
pub const FILESYSTEM_DISK_TYPE: &str = "filesystem";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "longhorn.io",
    version = "v1beta2",
    kind = "Node",
    plural = "nodes",
    shortname = "lhn",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LonghornNodeSpec {
    /// Node name as known to Longhorn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_scheduling: Option<bool>,

    /// Disks keyed by disk name
    #[serde(default)]
    pub disks: BTreeMap<String, NodeDiskSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One entry of `spec.disks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDiskSpec {
    /// Mountpoint on the node
    pub path: String,

    #[serde(default)]
    pub allow_scheduling: bool,

    /// Bytes kept free for the system
    #[serde(default)]
    pub storage_reserved: i64,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,

    #[serde(default)]
    pub eviction_requested: bool,
}

impl NodeDiskSpec {
    /// A schedulable filesystem disk at `path`
    pub fn filesystem(path: impl Into<String>, storage_reserved: i64, tags: Vec<String>) -> Self {
        Self {
            path: path.into(),
            allow_scheduling: true,
            storage_reserved,
            tags,
            disk_type: Some(FILESYSTEM_DISK_TYPE.to_string()),
            eviction_requested: false,
        }
    }
}
