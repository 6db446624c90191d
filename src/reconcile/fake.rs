//! In-memory appliance for reconciler tests

use crate::appliance::types::{
    ApplianceDisk, CreateDatasetRequest, CreateExtentRequest, CreateInitiatorGroupRequest,
    CreateNfsShareRequest, CreatePoolRequest, CreatePortalRequest, CreateTargetExtentRequest,
    CreateTargetRequest, Dataset, DatasetType, IscsiExtent, IscsiInitiatorGroup, IscsiPortal,
    IscsiTarget, IscsiTargetExtent, NfsShare, Pool, PoolTopology, Service, ServiceState,
    SystemInfo, Vdev, ISCSI_SERVICE, NFS_SERVICE,
};
use crate::domain::ports::ApplianceApi;
use crate::error::{ApplianceError, ApplianceErrorBody, Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use parking_lot::{Mutex, MutexGuard};

pub struct FakeState {
    pub reachable: bool,
    pub pools: Vec<Pool>,
    pub datasets: Vec<Dataset>,
    pub nfs_shares: Vec<NfsShare>,
    pub portals: Vec<IscsiPortal>,
    pub initiators: Vec<IscsiInitiatorGroup>,
    pub targets: Vec<IscsiTarget>,
    pub extents: Vec<IscsiExtent>,
    pub target_extents: Vec<IscsiTargetExtent>,
    pub services: Vec<Service>,
    pub unused_disks: Vec<ApplianceDisk>,
    /// Services whose start call fails
    pub failing_services: HashSet<String>,
    /// HTTP status returned by every dataset lookup
    pub dataset_lookup_status: Option<u16>,
    /// Every call, in order, as `<operation> <argument>`
    pub calls: Vec<String>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct FakeAppliance {
    state: Mutex<FakeState>,
}

fn appliance_error(status: u16, message: &str) -> Error {
    Error::Appliance(ApplianceError {
        status,
        body: ApplianceErrorBody::Structured {
            message: message.to_string(),
        },
    })
}

fn not_found(what: &str) -> Error {
    appliance_error(404, &format!("{} does not exist", what))
}

impl FakeAppliance {
    /// A reachable appliance with stopped NFS and iSCSI services and nothing else
    pub fn new() -> Self {
        let services = vec![
            Service {
                id: 1,
                service: NFS_SERVICE.into(),
                enable: false,
                state: ServiceState::Stopped,
            },
            Service {
                id: 2,
                service: ISCSI_SERVICE.into(),
                enable: false,
                state: ServiceState::Stopped,
            },
        ];
        Self {
            state: Mutex::new(FakeState {
                reachable: true,
                pools: Vec::new(),
                datasets: Vec::new(),
                nfs_shares: Vec::new(),
                portals: Vec::new(),
                initiators: Vec::new(),
                targets: Vec::new(),
                extents: Vec::new(),
                target_extents: Vec::new(),
                services,
                unused_disks: Vec::new(),
                failing_services: HashSet::new(),
                dataset_lookup_status: None,
                calls: Vec::new(),
                next_id: 100,
            }),
        }
    }

    pub fn with_unused_disks(self, names: &[&str]) -> Self {
        self.state().unused_disks = names
            .iter()
            .map(|n| ApplianceDisk {
                identifier: format!("{{serial}}{}", n),
                name: n.to_string(),
                size: 4 << 40,
                ..Default::default()
            })
            .collect();
        self
    }

    pub fn with_pool(self, name: &str) -> Self {
        {
            let mut state = self.state();
            let id = state.next_id();
            state.pools.push(Pool {
                id,
                name: name.into(),
                status: "ONLINE".into(),
                healthy: true,
                ..Default::default()
            });
        }
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    /// Number of recorded calls whose operation is `op`
    pub fn count(&self, op: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Whether any call mutated appliance state
    pub fn mutated(&self) -> bool {
        self.state().calls.iter().any(|c| {
            ["create_", "delete_", "start_", "stop_", "enable_"]
                .iter()
                .any(|p| c.starts_with(p))
        })
    }

    fn record(&self, call: String) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl ApplianceApi for FakeAppliance {
    async fn system_info(&self) -> Result<SystemInfo> {
        let state = self.record("system_info".into());
        if !state.reachable {
            return Err(Error::Connection {
                endpoint: "https://fake".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(SystemInfo {
            version: "TrueNAS-SCALE-24.04.2".into(),
            hostname: "nas".into(),
            ..Default::default()
        })
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        Ok(self.record("list_pools".into()).pools.clone())
    }

    async fn get_pool(&self, id: u64) -> Result<Pool> {
        let state = self.record(format!("get_pool {}", id));
        state
            .pools
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| not_found("pool"))
    }

    async fn create_pool(&self, request: CreatePoolRequest) -> Result<Pool> {
        let mut state = self.record(format!("create_pool {}", request.name));
        let vdevs = request
            .topology
            .data
            .iter()
            .map(|spec| Vdev {
                vdev_type: serde_json::to_value(spec.vdev_type)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                status: Some("ONLINE".into()),
                disk: None,
                children: spec
                    .disks
                    .iter()
                    .map(|d| Vdev {
                        vdev_type: "DISK".into(),
                        disk: Some(d.clone()),
                        ..Default::default()
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        let used: Vec<String> = vdevs.iter().flat_map(|v| v.disks()).collect();
        state.unused_disks.retain(|d| !used.contains(&d.name));

        let id = state.next_id();
        let pool = Pool {
            id,
            name: request.name.clone(),
            path: format!("/mnt/{}", request.name),
            status: "ONLINE".into(),
            healthy: true,
            topology: PoolTopology { data: vdevs },
            ..Default::default()
        };
        state.pools.push(pool.clone());
        Ok(pool)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(self.record("list_datasets".into()).datasets.clone())
    }

    async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        let state = self.record(format!("get_dataset {}", id));
        if let Some(status) = state.dataset_lookup_status {
            return Err(Error::Appliance(ApplianceError {
                status,
                body: ApplianceErrorBody::Raw {
                    status,
                    body: "internal error".into(),
                },
            }));
        }
        state
            .datasets
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn create_dataset(&self, request: CreateDatasetRequest) -> Result<Dataset> {
        let mut state = self.record(format!("create_dataset {}", request.name));
        if state.datasets.iter().any(|d| d.id == request.name) {
            return Err(appliance_error(422, "dataset already exists"));
        }
        let dataset_type = request.dataset_type.unwrap_or(DatasetType::Filesystem);
        let dataset = Dataset {
            id: request.name.clone(),
            name: request.name.clone(),
            pool: request.name.split('/').next().unwrap_or_default().to_string(),
            dataset_type,
            mountpoint: (dataset_type == DatasetType::Filesystem)
                .then(|| format!("/mnt/{}", request.name)),
            used: None,
            available: None,
            volsize: None,
        };
        state.datasets.push(dataset.clone());
        Ok(dataset)
    }

    async fn delete_dataset(&self, id: &str) -> Result<()> {
        let mut state = self.record(format!("delete_dataset {}", id));
        let before = state.datasets.len();
        state.datasets.retain(|d| d.id != id);
        if state.datasets.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn list_nfs_shares(&self) -> Result<Vec<NfsShare>> {
        Ok(self.record("list_nfs_shares".into()).nfs_shares.clone())
    }

    async fn get_nfs_share(&self, id: u64) -> Result<NfsShare> {
        let state = self.record(format!("get_nfs_share {}", id));
        state
            .nfs_shares
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| not_found("nfs share"))
    }

    async fn create_nfs_share(&self, request: CreateNfsShareRequest) -> Result<NfsShare> {
        let mut state = self.record(format!("create_nfs_share {}", request.path));
        let id = state.next_id();
        let share = NfsShare {
            id,
            path: request.path,
            comment: request.comment,
            enabled: true,
            networks: request.networks,
            hosts: request.hosts,
        };
        state.nfs_shares.push(share.clone());
        Ok(share)
    }

    async fn delete_nfs_share(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_nfs_share {}", id));
        state.nfs_shares.retain(|s| s.id != id);
        Ok(())
    }

    async fn list_iscsi_portals(&self) -> Result<Vec<IscsiPortal>> {
        Ok(self.record("list_iscsi_portals".into()).portals.clone())
    }

    async fn create_iscsi_portal(&self, request: CreatePortalRequest) -> Result<IscsiPortal> {
        let mut state = self.record("create_iscsi_portal".into());
        let id = state.next_id();
        let portal = IscsiPortal {
            id,
            tag: state.portals.len() as u64 + 1,
            comment: request.comment,
            listen: request.listen,
        };
        state.portals.push(portal.clone());
        Ok(portal)
    }

    async fn delete_iscsi_portal(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_iscsi_portal {}", id));
        state.portals.retain(|p| p.id != id);
        Ok(())
    }

    async fn list_iscsi_initiators(&self) -> Result<Vec<IscsiInitiatorGroup>> {
        Ok(self.record("list_iscsi_initiators".into()).initiators.clone())
    }

    async fn create_iscsi_initiator(
        &self,
        request: CreateInitiatorGroupRequest,
    ) -> Result<IscsiInitiatorGroup> {
        let mut state = self.record("create_iscsi_initiator".into());
        let id = state.next_id();
        let group = IscsiInitiatorGroup {
            id,
            tag: state.initiators.len() as u64 + 1,
            comment: request.comment,
            initiators: request.initiators,
        };
        state.initiators.push(group.clone());
        Ok(group)
    }

    async fn delete_iscsi_initiator(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_iscsi_initiator {}", id));
        state.initiators.retain(|i| i.id != id);
        Ok(())
    }

    async fn list_iscsi_targets(&self) -> Result<Vec<IscsiTarget>> {
        Ok(self.record("list_iscsi_targets".into()).targets.clone())
    }

    async fn create_iscsi_target(&self, request: CreateTargetRequest) -> Result<IscsiTarget> {
        let mut state = self.record(format!("create_iscsi_target {}", request.name));
        let id = state.next_id();
        let target = IscsiTarget {
            id,
            name: request.name,
            alias: request.alias,
            mode: request.mode,
            groups: request.groups,
        };
        state.targets.push(target.clone());
        Ok(target)
    }

    async fn delete_iscsi_target(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_iscsi_target {}", id));
        state.targets.retain(|t| t.id != id);
        Ok(())
    }

    async fn list_iscsi_extents(&self) -> Result<Vec<IscsiExtent>> {
        Ok(self.record("list_iscsi_extents".into()).extents.clone())
    }

    async fn create_iscsi_extent(&self, request: CreateExtentRequest) -> Result<IscsiExtent> {
        let mut state = self.record(format!("create_iscsi_extent {}", request.name));
        let id = state.next_id();
        let extent = IscsiExtent {
            id,
            name: request.name,
            extent_type: request.extent_type,
            disk: Some(request.disk),
            path: None,
            enabled: true,
        };
        state.extents.push(extent.clone());
        Ok(extent)
    }

    async fn delete_iscsi_extent(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_iscsi_extent {}", id));
        state.extents.retain(|e| e.id != id);
        Ok(())
    }

    async fn list_iscsi_target_extents(&self) -> Result<Vec<IscsiTargetExtent>> {
        Ok(self
            .record("list_iscsi_target_extents".into())
            .target_extents
            .clone())
    }

    async fn create_iscsi_target_extent(
        &self,
        request: CreateTargetExtentRequest,
    ) -> Result<IscsiTargetExtent> {
        let mut state = self.record("create_iscsi_target_extent".into());
        let id = state.next_id();
        let association = IscsiTargetExtent {
            id,
            target: request.target,
            extent: request.extent,
            lunid: request.lunid,
        };
        state.target_extents.push(association.clone());
        Ok(association)
    }

    async fn delete_iscsi_target_extent(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("delete_iscsi_target_extent {}", id));
        state.target_extents.retain(|t| t.id != id);
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.record("list_services".into()).services.clone())
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        let state = self.record(format!("get_service {}", name));
        state
            .services
            .iter()
            .find(|s| s.service == name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Service".into(),
                name: name.into(),
            })
    }

    async fn enable_service(&self, id: u64) -> Result<()> {
        let mut state = self.record(format!("enable_service {}", id));
        match state.services.iter_mut().find(|s| s.id == id) {
            Some(service) => {
                service.enable = true;
                Ok(())
            }
            None => Err(not_found("service")),
        }
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        let mut state = self.record(format!("start_service {}", name));
        if state.failing_services.contains(name) {
            return Err(appliance_error(500, &format!("{} failed to start", name)));
        }
        match state.services.iter_mut().find(|s| s.service == name) {
            Some(service) => {
                service.state = ServiceState::Running;
                Ok(())
            }
            None => Err(not_found(name)),
        }
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        let mut state = self.record(format!("stop_service {}", name));
        if let Some(service) = state.services.iter_mut().find(|s| s.service == name) {
            service.state = ServiceState::Stopped;
        }
        Ok(())
    }

    async fn list_disks(&self) -> Result<Vec<ApplianceDisk>> {
        Ok(self.record("list_disks".into()).unused_disks.clone())
    }

    async fn list_unused_disks(&self) -> Result<Vec<ApplianceDisk>> {
        Ok(self.record("list_unused_disks".into()).unused_disks.clone())
    }
}
