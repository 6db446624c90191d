//! Appliance Reconciler
//!
//! Brings the storage appliance into the state the cluster's CSI driver
//! expects: a pool, a parent dataset, and the NFS / iSCSI services with a
//! portal and an "allow all" initiator group. Required steps are fatal;
//! optional capabilities are recorded as warnings and the run continues.

use crate::appliance::types::{
    CreateDatasetRequest, CreateExtentRequest, CreateInitiatorGroupRequest, CreateNfsShareRequest,
    CreatePoolRequest, CreatePortalRequest, CreateTargetExtentRequest, CreateTargetRequest,
    Dataset, DatasetType, IscsiInitiatorGroup, IscsiPortal, Pool, PortalListen, Service,
    SystemInfo, TargetGroup, ISCSI_SERVICE, NFS_SERVICE,
};
use crate::config::Config;
use crate::domain::ports::ApplianceApiRef;
use crate::error::{Error, Result};
use crate::reconcile::csi::{self, CsiConnection};
use crate::reconcile::ensure::{ensure, first_matching, lookup_one, probe, require, Ensured};
use crate::reconcile::topology::select_topology_logged;
use serde::Serialize;
use tracing::{info, warn};

const MANAGED_COMMENT: &str = "Managed by storage-bootstrap";
const SMOKE_VOLUME_BYTES: u64 = 64 * 1024 * 1024;

// =============================================================================
// Reports
// =============================================================================

/// Outcome of an optional (warn-only) step
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome<T> {
    /// Disabled in configuration
    Skipped,
    Done(Ensured<T>),
    Failed { warning: String },
}

impl<T> StepOutcome<T> {
    pub fn resource(&self) -> Option<&T> {
        match self {
            StepOutcome::Done(ensured) => Some(&ensured.resource),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IscsiOutcome {
    pub service: StepOutcome<Service>,
    pub portal: StepOutcome<IscsiPortal>,
    pub initiator: StepOutcome<IscsiInitiatorGroup>,
}

impl IscsiOutcome {
    fn skipped() -> Self {
        Self {
            service: StepOutcome::Skipped,
            portal: StepOutcome::Skipped,
            initiator: StepOutcome::Skipped,
        }
    }
}

/// Result of a setup run
#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub system: SystemInfo,
    pub pool: Ensured<Pool>,
    pub dataset: Ensured<Dataset>,
    pub nfs: StepOutcome<Service>,
    pub iscsi: IscsiOutcome,
    pub warnings: Vec<String>,
}

impl SetupReport {
    pub fn csi_connection(&self, api_url: &str) -> CsiConnection {
        csi::project(
            api_url,
            &self.pool.resource.name,
            &self.dataset.resource,
            self.nfs.resource().is_some(),
            self.iscsi.portal.resource(),
            self.iscsi.initiator.resource(),
        )
    }
}

/// Resources confirmed present by a validation pass
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub system: SystemInfo,
    pub pool: Pool,
    pub dataset: Dataset,
    pub nfs_running: bool,
    pub portal: Option<IscsiPortal>,
    pub initiator: Option<IscsiInitiatorGroup>,
}

impl ValidationReport {
    pub fn csi_connection(&self, api_url: &str) -> CsiConnection {
        csi::project(
            api_url,
            &self.pool.name,
            &self.dataset,
            self.nfs_running,
            self.portal.as_ref(),
            self.initiator.as_ref(),
        )
    }
}

/// Result of an end-to-end smoke test
#[derive(Debug, Clone, Default, Serialize)]
pub struct SmokeTestReport {
    /// Resources created (and removed again), in creation order
    pub exercised: Vec<String>,
    /// Cleanup problems; the test itself still passed
    pub warnings: Vec<String>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives the appliance towards the configured state
pub struct Reconciler {
    api: ApplianceApiRef,
    config: Config,
}

/// Exact name match, else the first pool the appliance lists
fn select_pool(pools: Vec<Pool>, name: &str) -> Option<Pool> {
    if let Some(exact) = pools.iter().find(|p| p.name == name) {
        return Some(exact.clone());
    }
    pools.into_iter().next()
}

fn only_running(services: Vec<Service>, name: &str) -> Vec<Service> {
    services
        .into_iter()
        .filter(|s| s.service == name && s.is_running())
        .collect()
}

impl Reconciler {
    pub fn new(api: ApplianceApiRef, config: Config) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full setup pipeline
    pub async fn setup(&self) -> Result<SetupReport> {
        let mut warnings = Vec::new();

        let system = self.connect().await?;

        let pool = self.ensure_pool().await?;
        if !pool.created() && pool.resource.name != self.config.pool.name {
            let warning = format!(
                "pool {} not found; using existing pool {} (first listed by the appliance)",
                self.config.pool.name, pool.resource.name
            );
            warn!("{}", warning);
            warnings.push(warning);
        }
        info!("Pool {} {}", pool.resource.name, pool.action);

        let dataset = self.ensure_dataset(&pool.resource.name).await?;
        info!("Dataset {} {}", dataset.resource.id, dataset.action);

        let nfs = if self.config.nfs.enabled {
            soft("NFS service", self.ensure_service(NFS_SERVICE).await, &mut warnings)
        } else {
            StepOutcome::Skipped
        };

        let iscsi = if self.config.iscsi.enabled {
            IscsiOutcome {
                service: soft(
                    "iSCSI service",
                    self.ensure_service(ISCSI_SERVICE).await,
                    &mut warnings,
                ),
                portal: soft("iSCSI portal", self.ensure_portal().await, &mut warnings),
                initiator: soft(
                    "iSCSI initiator group",
                    self.ensure_initiator_group().await,
                    &mut warnings,
                ),
            }
        } else {
            IscsiOutcome::skipped()
        };

        Ok(SetupReport {
            system,
            pool,
            dataset,
            nfs,
            iscsi,
            warnings,
        })
    }

    /// Fetch system info; any failure aborts the run
    pub async fn connect(&self) -> Result<SystemInfo> {
        let system = self.api.system_info().await?;
        info!(
            "Connected to appliance {} (version {})",
            system.hostname, system.version
        );
        Ok(system)
    }

    /// Reuse the configured pool (or the first existing one), or create it from all unused disks
    pub async fn ensure_pool(&self) -> Result<Ensured<Pool>> {
        let name = self.config.pool.name.as_str();
        ensure(
            "pool",
            self.api.list_pools(),
            |pools| select_pool(pools, name),
            || self.create_pool(name),
        )
        .await
    }

    async fn create_pool(&self, name: &str) -> Result<Pool> {
        let unused = self.api.list_unused_disks().await?;
        if unused.is_empty() {
            return Err(Error::NoUnusedDisks {
                pool: name.to_string(),
            });
        }

        let topology = select_topology_logged(
            self.config.pool.redundancy,
            unused.len(),
            self.config.pool.min_disks_for_mirror,
        );
        let disks: Vec<String> = unused.into_iter().map(|d| d.name).collect();
        info!(
            "Creating pool {} as {} over {}",
            name,
            topology,
            disks.join(", ")
        );

        self.api
            .create_pool(CreatePoolRequest::single_vdev(name, topology, disks))
            .await
    }

    /// Reuse `<pool>/<dataset>` or create it as a filesystem
    pub async fn ensure_dataset(&self, pool: &str) -> Result<Ensured<Dataset>> {
        let id = self.config.dataset_id(pool);
        ensure(
            "dataset",
            lookup_one(self.api.get_dataset(&id)),
            |found| found.into_iter().next(),
            || {
                self.api.create_dataset(CreateDatasetRequest {
                    name: id.clone(),
                    comments: Some(MANAGED_COMMENT.to_string()),
                    ..Default::default()
                })
            },
        )
        .await
    }

    /// Enable and start a service unless it is already running
    pub async fn ensure_service(&self, name: &str) -> Result<Ensured<Service>> {
        ensure(
            name,
            async { Ok::<_, Error>(only_running(self.api.list_services().await?, name)) },
            |running| running.into_iter().next(),
            || self.activate_service(name),
        )
        .await
    }

    async fn activate_service(&self, name: &str) -> Result<Service> {
        let service = self.api.get_service(name).await?;
        if !service.enable {
            self.api.enable_service(service.id).await?;
        }
        self.api.start_service(name).await?;

        let service = self.api.get_service(name).await?;
        if !service.is_running() {
            return Err(Error::RequirementUnmet {
                requirement: format!("service {} running after start", name),
            });
        }
        Ok(service)
    }

    /// Reuse any portal already covering the configured listener, or create one
    pub async fn ensure_portal(&self) -> Result<Ensured<IscsiPortal>> {
        let ip = self.config.iscsi.listen_ip.as_str();
        let port = self.config.iscsi.port;
        ensure(
            "iSCSI portal",
            self.api.list_iscsi_portals(),
            first_matching(|p: &IscsiPortal| p.listens_on(ip, port)),
            || {
                self.api.create_iscsi_portal(CreatePortalRequest {
                    comment: self.config.iscsi.comment.clone(),
                    listen: vec![PortalListen {
                        ip: ip.to_string(),
                        port,
                    }],
                })
            },
        )
        .await
    }

    /// Reuse any initiator group that admits everyone, or create one
    pub async fn ensure_initiator_group(&self) -> Result<Ensured<IscsiInitiatorGroup>> {
        ensure(
            "iSCSI initiator group",
            self.api.list_iscsi_initiators(),
            first_matching(IscsiInitiatorGroup::allows_all),
            || {
                self.api.create_iscsi_initiator(CreateInitiatorGroupRequest {
                    comment: self.config.iscsi.comment.clone(),
                    initiators: Vec::new(),
                })
            },
        )
        .await
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check every requirement without writing; fail on the first unmet one
    pub async fn validate_requirements(&self) -> Result<ValidationReport> {
        let system = self.connect().await?;

        let name = self.config.pool.name.as_str();
        let pool = require(
            probe("pool", self.api.list_pools(), |pools| select_pool(pools, name)).await?,
            format!("storage pool (configured name {})", name),
        )?;

        let dataset_id = self.config.dataset_id(&pool.name);
        let dataset = require(
            probe("dataset", lookup_one(self.api.get_dataset(&dataset_id)), |found| {
                found.into_iter().next()
            })
            .await?,
            format!("dataset {}", dataset_id),
        )?;

        if self.config.nfs.enabled {
            self.require_running(NFS_SERVICE).await?;
        }

        let (portal, initiator) = if self.config.iscsi.enabled {
            self.require_running(ISCSI_SERVICE).await?;
            let portal = require(
                probe("iSCSI portal", self.api.list_iscsi_portals(), |p| {
                    p.into_iter().next()
                })
                .await?,
                "at least one iSCSI portal",
            )?;
            let initiator = require(
                probe("iSCSI initiator group", self.api.list_iscsi_initiators(), |i| {
                    i.into_iter().next()
                })
                .await?,
                "at least one iSCSI initiator group",
            )?;
            (Some(portal), Some(initiator))
        } else {
            (None, None)
        };

        info!("All storage requirements are met");
        Ok(ValidationReport {
            system,
            pool,
            dataset,
            nfs_running: self.config.nfs.enabled,
            portal,
            initiator,
        })
    }

    async fn require_running(&self, name: &str) -> Result<Service> {
        require(
            probe(
                name,
                async { Ok::<_, Error>(only_running(self.api.list_services().await?, name)) },
                |running| running.into_iter().next(),
            )
            .await?,
            format!("service {} running", name),
        )
    }

    // =========================================================================
    // Smoke Test
    // =========================================================================

    /// Exercise the data path by creating and removing throwaway resources.
    ///
    /// Everything created is removed again, also when a later step fails.
    pub async fn smoke_test(
        &self,
        pool: &str,
        portal: Option<&IscsiPortal>,
        initiator: Option<&IscsiInitiatorGroup>,
    ) -> Result<SmokeTestReport> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let mut created = Vec::new();
        let outcome = self
            .smoke_create(pool, &stamp, portal, initiator, &mut created)
            .await;

        let mut report = SmokeTestReport {
            exercised: created.iter().map(SmokeResource::describe).collect(),
            warnings: Vec::new(),
        };
        for resource in created.iter().rev() {
            if let Err(e) = self.smoke_remove(resource).await {
                let warning = format!("cleanup of {} failed: {}", resource.describe(), e);
                warn!("{}", warning);
                report.warnings.push(warning);
            }
        }

        outcome?;
        info!("Smoke test passed ({} resources)", report.exercised.len());
        Ok(report)
    }

    async fn smoke_create(
        &self,
        pool: &str,
        stamp: &str,
        portal: Option<&IscsiPortal>,
        initiator: Option<&IscsiInitiatorGroup>,
        created: &mut Vec<SmokeResource>,
    ) -> Result<()> {
        let parent = self.config.dataset_id(pool);
        let name = format!("smoke-{}", stamp);

        let dataset = self
            .api
            .create_dataset(CreateDatasetRequest {
                name: format!("{}/{}", parent, name),
                comments: Some(MANAGED_COMMENT.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| smoke_error("dataset", e))?;
        created.push(SmokeResource::Dataset(dataset.id.clone()));

        if self.config.nfs.enabled {
            let path = dataset
                .mountpoint
                .clone()
                .unwrap_or_else(|| format!("/mnt/{}", dataset.id));
            let share = self
                .api
                .create_nfs_share(CreateNfsShareRequest {
                    path,
                    comment: MANAGED_COMMENT.to_string(),
                    ..Default::default()
                })
                .await
                .map_err(|e| smoke_error("nfs share", e))?;
            created.push(SmokeResource::NfsShare(share.id));
        }

        let portal = match (self.config.iscsi.enabled, portal) {
            (true, Some(portal)) => portal,
            _ => return Ok(()),
        };

        let volume = self
            .api
            .create_dataset(CreateDatasetRequest {
                name: format!("{}/{}-vol", parent, name),
                dataset_type: Some(DatasetType::Volume),
                volsize: Some(SMOKE_VOLUME_BYTES),
                comments: Some(MANAGED_COMMENT.to_string()),
            })
            .await
            .map_err(|e| smoke_error("volume", e))?;
        created.push(SmokeResource::Dataset(volume.id.clone()));

        let extent = self
            .api
            .create_iscsi_extent(CreateExtentRequest {
                name: name.clone(),
                extent_type: "DISK".to_string(),
                disk: format!("zvol/{}", volume.id),
            })
            .await
            .map_err(|e| smoke_error("iscsi extent", e))?;
        created.push(SmokeResource::Extent(extent.id));

        let target = self
            .api
            .create_iscsi_target(CreateTargetRequest {
                name: name.clone(),
                alias: None,
                mode: "ISCSI".to_string(),
                groups: vec![TargetGroup {
                    portal: portal.id,
                    initiator: initiator.map(|i| i.id),
                    authmethod: "NONE".to_string(),
                }],
            })
            .await
            .map_err(|e| smoke_error("iscsi target", e))?;
        created.push(SmokeResource::Target(target.id));

        let association = self
            .api
            .create_iscsi_target_extent(CreateTargetExtentRequest {
                target: target.id,
                extent: extent.id,
                lunid: Some(0),
            })
            .await
            .map_err(|e| smoke_error("iscsi target extent", e))?;
        created.push(SmokeResource::TargetExtent(association.id));

        Ok(())
    }

    async fn smoke_remove(&self, resource: &SmokeResource) -> Result<()> {
        match resource {
            SmokeResource::Dataset(id) => self.api.delete_dataset(id).await,
            SmokeResource::NfsShare(id) => self.api.delete_nfs_share(*id).await,
            SmokeResource::Extent(id) => self.api.delete_iscsi_extent(*id).await,
            SmokeResource::Target(id) => self.api.delete_iscsi_target(*id).await,
            SmokeResource::TargetExtent(id) => self.api.delete_iscsi_target_extent(*id).await,
        }
    }
}

#[derive(Debug, Clone)]
enum SmokeResource {
    Dataset(String),
    NfsShare(u64),
    Extent(u64),
    Target(u64),
    TargetExtent(u64),
}

impl SmokeResource {
    fn describe(&self) -> String {
        match self {
            SmokeResource::Dataset(id) => format!("dataset {}", id),
            SmokeResource::NfsShare(id) => format!("nfs share {}", id),
            SmokeResource::Extent(id) => format!("iscsi extent {}", id),
            SmokeResource::Target(id) => format!("iscsi target {}", id),
            SmokeResource::TargetExtent(id) => format!("iscsi target extent {}", id),
        }
    }
}

fn smoke_error(stage: &str, e: Error) -> Error {
    Error::SmokeTest {
        stage: stage.to_string(),
        reason: e.to_string(),
    }
}

/// Record a failed optional step as a warning
fn soft<T>(step: &str, result: Result<Ensured<T>>, warnings: &mut Vec<String>) -> StepOutcome<T> {
    match result {
        Ok(ensured) => {
            info!("{} {}", step, ensured.action);
            StepOutcome::Done(ensured)
        }
        Err(e) => {
            let warning = format!("{}: {}", step, e);
            warn!("{}", warning);
            warnings.push(warning.clone());
            StepOutcome::Failed { warning }
        }
    }
}
