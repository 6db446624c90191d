//! Longhorn node disk registration
//!
//! Merges freshly mounted paths into a Longhorn node's `spec.disks` map.
//! Existing entries are never rewritten; only new paths are patched in.

use crate::config::LonghornConfig;
use crate::crd::{Node, NodeDiskSpec};
use crate::domain::ports::NodeDiskStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "storage-bootstrap";

// =============================================================================
// Merge Planning
// =============================================================================

/// What a merge would change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskMergePlan {
    /// New entries keyed by disk name
    pub additions: BTreeMap<String, NodeDiskSpec>,
    /// Requested paths already registered
    pub skipped: Vec<String>,
}

impl DiskMergePlan {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
    }
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Disk name from the last path component, restricted to `[a-z0-9-]`
pub fn disk_name_for(path: &str) -> String {
    let last = normalize_path(path).rsplit('/').next().unwrap_or_default();
    let mut name = String::with_capacity(last.len());
    for c in last.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches('-');
    if name.is_empty() {
        "disk".to_string()
    } else {
        name.to_string()
    }
}

/// Plan the addition of `paths` to an existing disk map
pub fn merge_disk_paths(
    existing: &BTreeMap<String, NodeDiskSpec>,
    paths: &[String],
    settings: &LonghornConfig,
) -> Result<DiskMergePlan> {
    let reserved = i64::try_from(settings.storage_reserved_bytes).map_err(|_| {
        Error::Configuration(format!(
            "longhorn.storage_reserved_bytes {} exceeds {}",
            settings.storage_reserved_bytes,
            i64::MAX
        ))
    })?;
    let mut known: BTreeSet<String> = existing
        .values()
        .map(|d| normalize_path(&d.path).to_string())
        .collect();
    let mut taken: BTreeSet<String> = existing.keys().cloned().collect();
    let mut plan = DiskMergePlan::default();

    for path in paths {
        let normalized = normalize_path(path).to_string();
        if !known.insert(normalized.clone()) {
            debug!("Disk path {} already registered", normalized);
            plan.skipped.push(normalized);
            continue;
        }

        let base = disk_name_for(&normalized);
        let mut name = base.clone();
        let mut suffix = 1;
        while taken.contains(&name) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        taken.insert(name.clone());

        let mut disk = NodeDiskSpec::filesystem(
            normalized,
            reserved,
            settings.tags.clone(),
        );
        disk.allow_scheduling = settings.allow_scheduling;
        plan.additions.insert(name, disk);
    }
    Ok(plan)
}

/// Read the node's disks, then patch in whatever is new.
///
/// Issues no patch when every path is already registered or when `dry_run`.
pub async fn register_disks(
    store: &dyn NodeDiskStore,
    node: &str,
    paths: &[String],
    settings: &LonghornConfig,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<DiskMergePlan> {
    let existing = store.node_disks(node).await?;
    let plan = merge_disk_paths(&existing, paths, settings)?;

    if plan.is_empty() {
        info!("Longhorn node {} already has every disk", node);
        return Ok(plan);
    }
    if dry_run {
        info!(
            "Dry run: would add {} disk(s) to Longhorn node {}",
            plan.additions.len(),
            node
        );
        return Ok(plan);
    }

    store.patch_node_disks(node, &plan.additions, cancel).await?;
    info!(
        "Added {} disk(s) to Longhorn node {}",
        plan.additions.len(),
        node
    );
    Ok(plan)
}

/// Race `fut` against cancellation
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

// =============================================================================
// Kubernetes Store
// =============================================================================

/// Longhorn `Node` resources through the Kubernetes API
pub struct KubeNodeDiskStore {
    api: Api<Node>,
}

impl KubeNodeDiskStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl NodeDiskStore for KubeNodeDiskStore {
    async fn node_disks(&self, node: &str) -> Result<BTreeMap<String, NodeDiskSpec>> {
        match self.api.get(node).await {
            Ok(resource) => Ok(resource.spec.disks),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::ResourceNotFound {
                kind: "nodes.longhorn.io".to_string(),
                name: node.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_node_disks(
        &self,
        node: &str,
        disks: &BTreeMap<String, NodeDiskSpec>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "disks": disks
            }
        });
        cancellable(cancel, async {
            self.api
                .patch(node, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?;
            Ok::<_, Error>(())
        })
        .await
    }
}
