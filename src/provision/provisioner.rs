//! Remote Disk Provisioner
//!
//! Turns raw disks on a cluster node into mounted filesystems and registers
//! them with Longhorn:
//!
//! ```text
//!   lsblk ──► free disks ──► selection ──► confirm
//!                                             │
//!        ┌────────────────────────────────────┘
//!        ▼   (per disk, in order)
//!   parted ─► wait ─► mkfs ─► mkdir ─► blkid ─► fstab ─► mount ─► chmod
//!        │
//!        ▼
//!   Longhorn node merge-patch (new paths only)
//! ```
//!
//! The Longhorn node is looked up before anything is destroyed. Disks are
//! processed one at a time. A failure or an interrupt stops the run before
//! the next disk; disks that finished earlier stay mounted and registered
//! nowhere.

use crate::config::{Config, LonghornConfig, NodeTarget, ProvisionerConfig};
use crate::domain::ports::{BlockDevice, DiskOperations, NodeDiskStore, Prompter};
use crate::error::{Error, Result};
use crate::provision::inventory::{
    free_disks, fstab_line, mountpoint_for, parse_selection, partition_path, select_explicit,
};
use crate::provision::node_disks::{register_disks, DiskMergePlan};
use crate::provision::shell::ShellDiskOperations;
use crate::provision::ssh::SshSession;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Request / Report
// =============================================================================

/// Operator input for one provisioning run
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    /// Longhorn node name
    pub node: String,
    /// Explicit devices; `None` asks interactively
    pub disks: Option<Vec<String>>,
    pub dry_run: bool,
    /// Skip the destructive-action confirmation
    pub assume_yes: bool,
}

/// What will be done to one disk
#[derive(Debug, Clone, Serialize)]
pub struct DiskPlan {
    pub device: String,
    pub size: String,
    pub partition: String,
    pub mountpoint: String,
    pub filesystem: String,
}

impl DiskPlan {
    fn new(device: &BlockDevice, settings: &ProvisionerConfig) -> Self {
        Self {
            device: device.name.clone(),
            size: device.size.clone(),
            partition: partition_path(&device.name),
            mountpoint: mountpoint_for(&settings.mount_prefix, &device.name),
            filesystem: settings.filesystem.clone(),
        }
    }

    pub fn fstab_entry(&self, uuid: &str) -> String {
        fstab_line(uuid, &self.mountpoint, &self.filesystem)
    }
}

/// A disk that went through every step
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedDisk {
    pub device: String,
    pub mountpoint: String,
    pub uuid: String,
    /// False when an fstab entry for the mountpoint already existed
    pub fstab_added: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub node: String,
    pub dry_run: bool,
    pub plans: Vec<DiskPlan>,
    pub provisioned: Vec<ProvisionedDisk>,
    pub registration: DiskMergePlan,
}

// =============================================================================
// Provisioner
// =============================================================================

pub struct DiskProvisioner<'a> {
    ops: &'a dyn DiskOperations,
    store: &'a dyn NodeDiskStore,
    prompter: &'a dyn Prompter,
    settings: &'a ProvisionerConfig,
    longhorn: &'a LonghornConfig,
}

impl<'a> DiskProvisioner<'a> {
    pub fn new(
        ops: &'a dyn DiskOperations,
        store: &'a dyn NodeDiskStore,
        prompter: &'a dyn Prompter,
        settings: &'a ProvisionerConfig,
        longhorn: &'a LonghornConfig,
    ) -> Self {
        Self {
            ops,
            store,
            prompter,
            settings,
            longhorn,
        }
    }

    pub async fn run(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionReport> {
        self.settings.validate()?;

        let devices = self.ops.list_block_devices().await?;
        let selected = match &request.disks {
            Some(names) => select_explicit(names, &devices)?,
            None => self.choose(&devices)?,
        };
        let plans: Vec<DiskPlan> = selected
            .iter()
            .map(|d| DiskPlan::new(d, self.settings))
            .collect();
        let paths: Vec<String> = plans.iter().map(|p| p.mountpoint.clone()).collect();

        if request.dry_run {
            for plan in &plans {
                info!(
                    "Dry run: {} -> {} ({}) mounted at {}, fstab: {}",
                    plan.device,
                    plan.partition,
                    plan.filesystem,
                    plan.mountpoint,
                    plan.fstab_entry("<uuid>")
                );
            }
            let registration = register_disks(
                self.store,
                &request.node,
                &paths,
                self.longhorn,
                true,
                cancel,
            )
            .await?;
            return Ok(ProvisionReport {
                node: request.node.clone(),
                dry_run: true,
                plans,
                provisioned: Vec::new(),
                registration,
            });
        }

        // Unknown node fails here, before anything is destroyed
        let registered = self.store.node_disks(&request.node).await?;
        debug!(
            "Longhorn node {} has {} disk(s) registered",
            request.node,
            registered.len()
        );

        if !request.assume_yes {
            let targets: Vec<String> = plans.iter().map(|p| format!("/dev/{}", p.device)).collect();
            let prompt = format!(
                "ALL DATA on {} (node {}) will be destroyed. Continue? [y/N] ",
                targets.join(", "),
                request.node
            );
            if !self.prompter.confirm(&prompt)? {
                return Err(Error::Aborted("operator declined disk provisioning".to_string()));
            }
        }

        let mut provisioned = Vec::with_capacity(plans.len());
        for plan in &plans {
            if cancel.is_cancelled() {
                if provisioned.is_empty() {
                    return Err(Error::Aborted(
                        "interrupted before any disk was touched".to_string(),
                    ));
                }
                return Err(stopped_at(plan, &provisioned, Error::Cancelled));
            }
            match self.provision_disk(plan).await {
                Ok(disk) => provisioned.push(disk),
                Err(e) => return Err(stopped_at(plan, &provisioned, e)),
            }
        }

        let registration = register_disks(
            self.store,
            &request.node,
            &paths,
            self.longhorn,
            false,
            cancel,
        )
        .await?;

        Ok(ProvisionReport {
            node: request.node.clone(),
            dry_run: false,
            plans,
            provisioned,
            registration,
        })
    }

    /// Ask the operator which free disks to use
    fn choose(&self, devices: &[BlockDevice]) -> Result<Vec<BlockDevice>> {
        let free = free_disks(devices);
        if free.is_empty() {
            return Err(Error::Selection("no free disks on the host".to_string()));
        }

        let mut prompt = String::from("Free disks:\n");
        for (i, disk) in free.iter().enumerate() {
            prompt.push_str(&format!("  {}) /dev/{} {}\n", i + 1, disk.name, disk.size));
        }
        prompt.push_str("Select disks (all, or comma-separated numbers): ");

        let answer = self.prompter.read_line(&prompt)?;
        let picked = parse_selection(&answer, free.len())?;
        Ok(picked.into_iter().map(|i| free[i].clone()).collect())
    }

    async fn provision_disk(&self, plan: &DiskPlan) -> Result<ProvisionedDisk> {
        info!("Provisioning /dev/{} as {}", plan.device, plan.mountpoint);

        self.ops.create_partition(&plan.device).await?;
        self.ops.wait_for_device(&plan.partition).await?;
        self.ops.format(&plan.partition, &plan.filesystem).await?;
        self.ops.create_mount_dir(&plan.mountpoint).await?;
        let uuid = self.ops.filesystem_uuid(&plan.partition).await?;

        let fstab_added = if self.ops.has_fstab_entry(&plan.mountpoint).await? {
            warn!("fstab already has an entry for {}, leaving it", plan.mountpoint);
            false
        } else {
            self.ops.append_fstab_entry(&plan.fstab_entry(&uuid)).await?;
            true
        };

        self.ops.mount(&plan.mountpoint).await?;
        self.ops.set_permissions(&plan.mountpoint).await?;

        info!("Mounted {} at {} (UUID {})", plan.partition, plan.mountpoint, uuid);
        Ok(ProvisionedDisk {
            device: plan.device.clone(),
            mountpoint: plan.mountpoint.clone(),
            uuid,
            fstab_added,
        })
    }
}

/// The error for a run that stopped at `plan`, after `provisioned` finished
fn stopped_at(plan: &DiskPlan, provisioned: &[ProvisionedDisk], source: Error) -> Error {
    if !provisioned.is_empty() {
        let done: Vec<&str> = provisioned.iter().map(|d| d.device.as_str()).collect();
        warn!("Already provisioned and left mounted: {}", done.join(", "));
    }
    Error::DiskProvisioning {
        device: plan.device.clone(),
        completed: provisioned.len(),
        source: Box::new(source),
    }
}

// =============================================================================
// Session-scoped entry point
// =============================================================================

/// Resolve the SSH target for a node, applying a `--host` override
pub fn resolve_target(config: &Config, node: &str, host_override: Option<&str>) -> Result<NodeTarget> {
    let mut target = match (config.nodes.get(node), host_override) {
        (Some(target), _) => target.clone(),
        (None, Some(host)) => NodeTarget {
            host: host.to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
        },
        (None, None) => {
            return Err(Error::Configuration(format!(
                "no SSH target for node {}; add nodes.{} to the config or pass --host",
                node, node
            )))
        }
    };
    if let Some(host) = host_override {
        target.host = host.to_string();
    }
    Ok(target)
}

/// Open a session to `target`, provision, and close the session on every path
pub async fn provision_node(
    target: NodeTarget,
    config: &Config,
    store: &dyn NodeDiskStore,
    prompter: &dyn Prompter,
    request: &ProvisionRequest,
    cancel: &CancellationToken,
) -> Result<ProvisionReport> {
    let session = SshSession::open(target).await?;
    let ops = ShellDiskOperations::new(session, config.provisioner.clone());

    let result = DiskProvisioner::new(&ops, store, prompter, &config.provisioner, &config.longhorn)
        .run(request, cancel)
        .await;

    if let Err(e) = ops.into_executor().close().await {
        warn!("Failed to close SSH session: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::inventory::parse_lsblk;
    use crate::provision::node_disks::testing::MemoryStore;
    use crate::provision::shell::testing::ScriptedExecutor;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use parking_lot::Mutex;

    const HOST: &str = "\
sda 238.5G disk
sda1 512M part /boot/efi vfat sda
sda2 238G part / ext4 sda
sdb 931.5G disk
sdc 931.5G disk
nvme0n1 1.8T disk
";

    /// Disk operations over an in-memory host
    #[derive(Default)]
    struct FakeDisks {
        calls: Mutex<Vec<String>>,
        fstab: Mutex<HashSet<String>>,
        fail_format_on: Option<String>,
    }

    impl FakeDisks {
        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn mutated(&self) -> bool {
            self.calls().iter().any(|c| !c.starts_with("lsblk"))
        }
    }

    #[async_trait]
    impl DiskOperations for FakeDisks {
        async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
            self.record("lsblk".into());
            Ok(parse_lsblk(HOST))
        }

        async fn create_partition(&self, device: &str) -> Result<()> {
            self.record(format!("partition {}", device));
            Ok(())
        }

        async fn wait_for_device(&self, partition: &str) -> Result<()> {
            self.record(format!("wait {}", partition));
            Ok(())
        }

        async fn format(&self, partition: &str, filesystem: &str) -> Result<()> {
            self.record(format!("format {} {}", partition, filesystem));
            if self.fail_format_on.as_deref() == Some(partition) {
                return Err(Error::RemoteCommand {
                    command: format!("mkfs.{} {}", filesystem, partition),
                    exit_code: 1,
                    stderr: "device is busy".into(),
                });
            }
            Ok(())
        }

        async fn create_mount_dir(&self, mountpoint: &str) -> Result<()> {
            self.record(format!("mkdir {}", mountpoint));
            Ok(())
        }

        async fn filesystem_uuid(&self, partition: &str) -> Result<String> {
            self.record(format!("uuid {}", partition));
            Ok(format!("uuid-{}", partition.trim_start_matches("/dev/")))
        }

        async fn has_fstab_entry(&self, mountpoint: &str) -> Result<bool> {
            Ok(self.fstab.lock().contains(mountpoint))
        }

        async fn append_fstab_entry(&self, entry: &str) -> Result<()> {
            self.record(format!("fstab {}", entry));
            if let Some(mountpoint) = entry.split(' ').nth(1) {
                self.fstab.lock().insert(mountpoint.to_string());
            }
            Ok(())
        }

        async fn mount(&self, mountpoint: &str) -> Result<()> {
            self.record(format!("mount {}", mountpoint));
            Ok(())
        }

        async fn set_permissions(&self, mountpoint: &str) -> Result<()> {
            self.record(format!("chmod {}", mountpoint));
            Ok(())
        }
    }

    struct Answers(Mutex<Vec<String>>);

    impl Answers {
        fn new(answers: &[&str]) -> Self {
            Self(Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()))
        }
    }

    impl Prompter for Answers {
        fn read_line(&self, _prompt: &str) -> Result<String> {
            self.0
                .lock()
                .pop()
                .ok_or_else(|| Error::Aborted("no more answers".into()))
        }
    }

    fn request(disks: Option<&[&str]>) -> ProvisionRequest {
        ProvisionRequest {
            node: "worker-1".into(),
            disks: disks.map(|d| d.iter().map(|s| s.to_string()).collect()),
            dry_run: false,
            assume_yes: true,
        }
    }

    async fn run(
        disks: &FakeDisks,
        store: &MemoryStore,
        answers: &Answers,
        request: &ProvisionRequest,
    ) -> Result<ProvisionReport> {
        run_with(disks, store, answers, request, &CancellationToken::new()).await
    }

    async fn run_with(
        disks: &FakeDisks,
        store: &MemoryStore,
        answers: &Answers,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionReport> {
        let settings = ProvisionerConfig::default();
        let longhorn = LonghornConfig::default();
        DiskProvisioner::new(disks, store, answers, &settings, &longhorn)
            .run(request, cancel)
            .await
    }

    /// Disk operations that cancel `token` once `device` is fully provisioned
    struct CancelAfter<'a> {
        inner: &'a FakeDisks,
        device: &'static str,
        token: CancellationToken,
    }

    #[async_trait]
    impl DiskOperations for CancelAfter<'_> {
        async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
            self.inner.list_block_devices().await
        }
        async fn create_partition(&self, device: &str) -> Result<()> {
            self.inner.create_partition(device).await
        }
        async fn wait_for_device(&self, partition: &str) -> Result<()> {
            self.inner.wait_for_device(partition).await
        }
        async fn format(&self, partition: &str, filesystem: &str) -> Result<()> {
            self.inner.format(partition, filesystem).await
        }
        async fn create_mount_dir(&self, mountpoint: &str) -> Result<()> {
            self.inner.create_mount_dir(mountpoint).await
        }
        async fn filesystem_uuid(&self, partition: &str) -> Result<String> {
            self.inner.filesystem_uuid(partition).await
        }
        async fn has_fstab_entry(&self, mountpoint: &str) -> Result<bool> {
            self.inner.has_fstab_entry(mountpoint).await
        }
        async fn append_fstab_entry(&self, entry: &str) -> Result<()> {
            self.inner.append_fstab_entry(entry).await
        }
        async fn mount(&self, mountpoint: &str) -> Result<()> {
            self.inner.mount(mountpoint).await
        }
        async fn set_permissions(&self, mountpoint: &str) -> Result<()> {
            self.inner.set_permissions(mountpoint).await?;
            if mountpoint.ends_with(self.device) {
                self.token.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_provisions_selected_disks_in_order() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();

        let report = run(&disks, &store, &Answers::new(&[]), &request(Some(&["sdb", "nvme0n1"])))
            .await
            .unwrap();

        assert_eq!(report.provisioned.len(), 2);
        assert!(report.provisioned.iter().all(|d| d.fstab_added));
        assert_eq!(
            disks.calls()[1..9].to_vec(),
            vec![
                "partition sdb",
                "wait /dev/sdb1",
                "format /dev/sdb1 ext4",
                "mkdir /mnt/longhorn-sdb",
                "uuid /dev/sdb1",
                "fstab UUID=uuid-sdb1 /mnt/longhorn-sdb ext4 defaults,nofail 0 2",
                "mount /mnt/longhorn-sdb",
                "chmod /mnt/longhorn-sdb",
            ]
        );
        assert!(disks.calls().contains(&"wait /dev/nvme0n1p1".to_string()));

        let registered = store.disks.lock().clone();
        assert_eq!(registered["longhorn-sdb"].path, "/mnt/longhorn-sdb");
        assert_eq!(registered["longhorn-nvme0n1"].path, "/mnt/longhorn-nvme0n1");
        assert_eq!(*store.patches.lock(), 1);
    }

    #[tokio::test]
    async fn test_existing_fstab_entry_is_kept() {
        let disks = FakeDisks::default();
        disks.fstab.lock().insert("/mnt/longhorn-sdb".into());
        let store = MemoryStore::default();

        let report = run(&disks, &store, &Answers::new(&[]), &request(Some(&["sdb"])))
            .await
            .unwrap();

        assert!(!report.provisioned[0].fstab_added);
        assert!(!disks.calls().iter().any(|c| c.starts_with("fstab")));
        assert!(disks.calls().contains(&"mount /mnt/longhorn-sdb".to_string()));
    }

    #[tokio::test]
    async fn test_system_disk_is_refused() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();

        let result = run(&disks, &store, &Answers::new(&[]), &request(Some(&["sda"]))).await;

        assert_matches!(result, Err(Error::DiskUnavailable { ref device, .. }) if device == "sda");
        assert!(!disks.mutated());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let mut req = request(Some(&["sdb"]));
        req.dry_run = true;
        req.assume_yes = false;

        let report = run(&disks, &store, &Answers::new(&[]), &req).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.plans[0].partition, "/dev/sdb1");
        assert_eq!(report.registration.additions.len(), 1);
        assert!(!disks.mutated());
        assert_eq!(*store.patches.lock(), 0);
    }

    #[tokio::test]
    async fn test_declined_confirmation_aborts() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let mut req = request(Some(&["sdb"]));
        req.assume_yes = false;

        let result = run(&disks, &store, &Answers::new(&["n"]), &req).await;

        assert_matches!(result, Err(Error::Aborted(_)));
        assert!(!disks.mutated());
    }

    #[tokio::test]
    async fn test_interactive_selection() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let mut req = request(None);
        req.assume_yes = false;

        // Free disks are listed as sdb, sdc, nvme0n1
        let report = run(&disks, &store, &Answers::new(&["3,1", "yes"]), &req)
            .await
            .unwrap();

        let devices: Vec<&str> = report.plans.iter().map(|p| p.device.as_str()).collect();
        assert_eq!(devices, vec!["nvme0n1", "sdb"]);
    }

    #[tokio::test]
    async fn test_invalid_selection_is_rejected() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();

        let result = run(&disks, &store, &Answers::new(&["5"]), &request(None)).await;

        assert_matches!(result, Err(Error::Selection(_)));
        assert!(!disks.mutated());
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_names_disk() {
        let disks = FakeDisks {
            fail_format_on: Some("/dev/sdc1".into()),
            ..Default::default()
        };
        let store = MemoryStore::default();

        let result = run(&disks, &store, &Answers::new(&[]), &request(Some(&["sdb", "sdc", "nvme0n1"]))).await;

        assert_matches!(
            result,
            Err(Error::DiskProvisioning { ref device, completed: 1, .. }) if device == "sdc"
        );
        assert!(disks.calls().contains(&"chmod /mnt/longhorn-sdb".to_string()));
        assert!(!disks.calls().iter().any(|c| c.contains("nvme0n1")));
        assert_eq!(*store.patches.lock(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_fails_before_any_disk_is_touched() {
        let disks = FakeDisks::default();
        let store = MemoryStore::missing();

        let result = run(&disks, &store, &Answers::new(&[]), &request(Some(&["sdb", "nvme0n1"]))).await;

        assert_matches!(
            result,
            Err(Error::ResourceNotFound { ref name, .. }) if name == "worker-1"
        );
        assert!(!disks.mutated());
    }

    #[tokio::test]
    async fn test_unknown_node_is_reported_before_the_prompt() {
        let disks = FakeDisks::default();
        let store = MemoryStore::missing();
        let mut req = request(Some(&["sdb"]));
        req.assume_yes = false;
        let answers = Answers::new(&["yes"]);

        let result = run(&disks, &store, &answers, &req).await;

        assert_matches!(result, Err(Error::ResourceNotFound { .. }));
        // The confirmation was never asked for
        assert_eq!(answers.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_before_start_touches_nothing() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_with(
            &disks,
            &store,
            &Answers::new(&[]),
            &request(Some(&["sdb", "sdc", "nvme0n1"])),
            &cancel,
        )
        .await;

        assert_matches!(result, Err(Error::Aborted(_)));
        assert!(!disks.calls().iter().any(|c| c.starts_with("partition")));
        assert_eq!(*store.patches.lock(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_disk() {
        let disks = FakeDisks::default();
        let cancel = CancellationToken::new();
        let ops = CancelAfter {
            inner: &disks,
            device: "sdb",
            token: cancel.clone(),
        };
        let store = MemoryStore::default();
        let settings = ProvisionerConfig::default();
        let longhorn = LonghornConfig::default();

        let result = DiskProvisioner::new(&ops, &store, &Answers::new(&[]), &settings, &longhorn)
            .run(&request(Some(&["sdb", "sdc", "nvme0n1"])), &cancel)
            .await;

        assert_matches!(
            result,
            Err(Error::DiskProvisioning { ref device, completed: 1, ref source })
                if device == "sdc" && matches!(**source, Error::Cancelled)
        );
        let partitions: Vec<String> = disks
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("partition"))
            .collect();
        assert_eq!(partitions, vec!["partition sdb"]);
        assert_eq!(*store.patches.lock(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_filesystem_is_rejected_up_front() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let settings = ProvisionerConfig {
            filesystem: "ext4 -E nodiscard".into(),
            ..Default::default()
        };
        let longhorn = LonghornConfig::default();

        let result = DiskProvisioner::new(&disks, &store, &Answers::new(&[]), &settings, &longhorn)
            .run(&request(Some(&["sdb"])), &CancellationToken::new())
            .await;

        assert_matches!(result, Err(Error::Configuration(_)));
        assert!(disks.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_does_not_patch_again() {
        let disks = FakeDisks::default();
        let store = MemoryStore::default();
        let req = request(Some(&["sdb"]));

        run(&disks, &store, &Answers::new(&[]), &req).await.unwrap();
        let again = run(&disks, &store, &Answers::new(&[]), &req).await.unwrap();

        assert!(again.registration.is_empty());
        assert_eq!(again.registration.skipped, vec!["/mnt/longhorn-sdb"]);
        assert_eq!(*store.patches.lock(), 1);
    }

    #[tokio::test]
    async fn test_shell_backed_run_over_scripted_executor() {
        let executor = ScriptedExecutor::new()
            .on("lsblk", HOST, 0)
            .on("blkid", "0b6f-42\n", 0)
            .on("awk", "", 1);
        let settings = ProvisionerConfig {
            use_sudo: false,
            partition_settle_ms: 0,
            device_wait_interval_ms: 0,
            ..Default::default()
        };
        let ops = ShellDiskOperations::new(executor, settings.clone());
        let store = MemoryStore::default();
        let longhorn = LonghornConfig::default();

        DiskProvisioner::new(&ops, &store, &Answers::new(&[]), &settings, &longhorn)
            .run(&request(Some(&["sdb"])), &CancellationToken::new())
            .await
            .unwrap();

        let commands = ops.into_executor().commands();
        assert!(commands.contains(&"mkfs.ext4 -F /dev/sdb1".to_string()));
        assert!(commands.contains(
            &"echo 'UUID=0b6f-42 /mnt/longhorn-sdb ext4 defaults,nofail 0 2' | tee -a /etc/fstab > /dev/null"
                .to_string()
        ));
        assert_eq!(commands.last().unwrap(), "chmod 777 /mnt/longhorn-sdb");
    }

    #[test]
    fn test_resolve_target() {
        let mut config = Config::default();
        config.nodes.insert(
            "worker-1".into(),
            NodeTarget {
                host: "10.0.0.11".into(),
                user: "ubuntu".into(),
                port: 22,
                identity_file: None,
            },
        );

        let target = resolve_target(&config, "worker-1", None).unwrap();
        assert_eq!(target.user, "ubuntu");

        let target = resolve_target(&config, "worker-1", Some("10.0.0.99")).unwrap();
        assert_eq!(target.host, "10.0.0.99");
        assert_eq!(target.user, "ubuntu");

        let target = resolve_target(&config, "worker-2", Some("10.0.0.12")).unwrap();
        assert_eq!(target.user, "root");

        assert_matches!(
            resolve_target(&config, "worker-2", None),
            Err(Error::Configuration(_))
        );
    }
}
