//! Appliance REST Client
//!
//! Typed binding to the appliance's `/api/v2.0` REST surface. Every request
//! carries the bearer token; every accessor validates its inputs before any
//! network call.

use crate::appliance::types::{
    ApplianceDisk, CreateDatasetRequest, CreateExtentRequest, CreateInitiatorGroupRequest,
    CreateNfsShareRequest, CreatePoolRequest, CreatePortalRequest, CreateTargetExtentRequest,
    CreateTargetRequest, Dataset, DatasetType, IscsiExtent, IscsiInitiatorGroup, IscsiPortal,
    IscsiTarget, IscsiTargetExtent, NfsShare, Pool, Service, SystemInfo,
};
use crate::config::ApplianceConfig;
use crate::domain::ports::ApplianceApi;
use crate::error::{ApplianceError, ApplianceErrorBody, Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const API_PREFIX: &str = "/api/v2.0";

// =============================================================================
// Error Decoding
// =============================================================================

/// The appliance's structured error schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorSchema {
    message: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

fn non_empty_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Decode an error response body.
///
/// A body that parses into the error schema with a non-empty `message` (or,
/// failing that, `error`) surfaces verbatim; anything else becomes a raw
/// `status N: body` error.
pub fn decode_error(status: u16, body: &[u8]) -> ApplianceError {
    let structured = serde_json::from_slice::<ErrorSchema>(body)
        .ok()
        .and_then(|schema| non_empty_text(schema.message).or_else(|| non_empty_text(schema.error)));

    let body = match structured {
        Some(message) => ApplianceErrorBody::Structured { message },
        None => ApplianceErrorBody::Raw {
            status,
            body: String::from_utf8_lossy(body).trim().to_string(),
        },
    };
    ApplianceError { status, body }
}

// =============================================================================
// Input Validation
// =============================================================================

fn require_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn require_id(what: &str, id: u64) -> Result<()> {
    if id == 0 {
        return Err(Error::Validation(format!("{} id must be positive", what)));
    }
    Ok(())
}

// =============================================================================
// Client
// =============================================================================

/// REST client for the storage appliance
pub struct ApplianceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApplianceClient {
    /// Build a client for the configured appliance
    pub fn new(config: &ApplianceConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        require_name("appliance url", &config.url)?;
        require_name("appliance api key", &api_key)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: format!("{}{}", config.url.trim_end_matches('/'), API_PREFIX),
            api_key,
        })
    }

    /// Appliance base URL without the API prefix
    pub fn endpoint(&self) -> &str {
        self.base_url.trim_end_matches(API_PREFIX)
    }

    /// Issue one request and return the raw response body
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("{} {}", method, url);

        let mut builder = self
            .http
            .request(method, &url)
            .bearer_auth(&self.api_key);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|e| Error::Connection {
            endpoint: self.endpoint().to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| Error::Connection {
            endpoint: self.endpoint().to_string(),
            reason: format!("reading response body: {}", e),
        })?;

        if status >= 400 {
            return Err(decode_error(status, &bytes).into());
        }
        Ok(bytes.to_vec())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let bytes = self.request(Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let bytes = self.request(method, path, Some(body)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path, None).await?;
        Ok(())
    }
}

fn dataset_path(id: &str) -> String {
    format!("pool/dataset/id/{}", urlencoding::encode(id))
}

#[async_trait]
impl ApplianceApi for ApplianceClient {
    async fn system_info(&self) -> Result<SystemInfo> {
        self.get("system/info").await
    }

    // -------------------------------------------------------------------------
    // Pools
    // -------------------------------------------------------------------------

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        self.get("pool").await
    }

    async fn get_pool(&self, id: u64) -> Result<Pool> {
        require_id("pool", id)?;
        self.get(&format!("pool/id/{}", id)).await
    }

    async fn create_pool(&self, request: CreatePoolRequest) -> Result<Pool> {
        require_name("pool name", &request.name)?;
        let disks: Vec<&String> = request.topology.data.iter().flat_map(|v| &v.disks).collect();
        if disks.is_empty() {
            return Err(Error::Validation(format!(
                "pool {} needs at least one disk",
                request.name
            )));
        }
        if let Some(empty) = disks.iter().find(|d| d.trim().is_empty()) {
            return Err(Error::Validation(format!("invalid disk name {:?}", empty)));
        }

        info!("Creating pool {} from {} disk(s)", request.name, disks.len());
        let created: serde_json::Value = self.send(Method::POST, "pool", &request).await?;

        // Pool creation may answer with a job id instead of the pool itself
        if created.is_object() {
            return Ok(serde_json::from_value(created)?);
        }
        self.list_pools()
            .await?
            .into_iter()
            .find(|p| p.name == request.name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Pool".into(),
                name: request.name.clone(),
            })
    }

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        self.get("pool/dataset").await
    }

    async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        require_name("dataset id", id)?;
        self.get(&dataset_path(id)).await
    }

    async fn create_dataset(&self, mut request: CreateDatasetRequest) -> Result<Dataset> {
        require_name("dataset name", &request.name)?;
        if !request.name.contains('/') {
            return Err(Error::Validation(format!(
                "dataset name {} must be <pool>/<name>",
                request.name
            )));
        }
        let dataset_type = *request.dataset_type.get_or_insert(DatasetType::Filesystem);
        if dataset_type == DatasetType::Volume && request.volsize.unwrap_or(0) == 0 {
            return Err(Error::Validation(format!(
                "volume {} needs a positive volsize",
                request.name
            )));
        }

        info!("Creating dataset {} ({:?})", request.name, dataset_type);
        self.send(Method::POST, "pool/dataset", &request).await
    }

    async fn delete_dataset(&self, id: &str) -> Result<()> {
        require_name("dataset id", id)?;
        info!("Deleting dataset {}", id);
        self.delete(&dataset_path(id)).await
    }

    // -------------------------------------------------------------------------
    // NFS
    // -------------------------------------------------------------------------

    async fn list_nfs_shares(&self) -> Result<Vec<NfsShare>> {
        self.get("sharing/nfs").await
    }

    async fn get_nfs_share(&self, id: u64) -> Result<NfsShare> {
        require_id("nfs share", id)?;
        self.get(&format!("sharing/nfs/id/{}", id)).await
    }

    async fn create_nfs_share(&self, request: CreateNfsShareRequest) -> Result<NfsShare> {
        require_name("nfs share path", &request.path)?;
        if !request.path.starts_with('/') {
            return Err(Error::Validation(format!(
                "nfs share path {} must be absolute",
                request.path
            )));
        }
        info!("Creating NFS share for {}", request.path);
        self.send(Method::POST, "sharing/nfs", &request).await
    }

    async fn delete_nfs_share(&self, id: u64) -> Result<()> {
        require_id("nfs share", id)?;
        self.delete(&format!("sharing/nfs/id/{}", id)).await
    }

    // -------------------------------------------------------------------------
    // iSCSI
    // -------------------------------------------------------------------------

    async fn list_iscsi_portals(&self) -> Result<Vec<IscsiPortal>> {
        self.get("iscsi/portal").await
    }

    async fn create_iscsi_portal(&self, request: CreatePortalRequest) -> Result<IscsiPortal> {
        if request.listen.is_empty() {
            return Err(Error::Validation("portal needs at least one listen address".into()));
        }
        for listen in &request.listen {
            require_name("portal listen ip", &listen.ip)?;
            if listen.port == 0 {
                return Err(Error::Validation("portal port must be positive".into()));
            }
        }
        self.send(Method::POST, "iscsi/portal", &request).await
    }

    async fn delete_iscsi_portal(&self, id: u64) -> Result<()> {
        require_id("portal", id)?;
        self.delete(&format!("iscsi/portal/id/{}", id)).await
    }

    async fn list_iscsi_initiators(&self) -> Result<Vec<IscsiInitiatorGroup>> {
        self.get("iscsi/initiator").await
    }

    async fn create_iscsi_initiator(
        &self,
        request: CreateInitiatorGroupRequest,
    ) -> Result<IscsiInitiatorGroup> {
        if let Some(empty) = request.initiators.iter().find(|i| i.trim().is_empty()) {
            return Err(Error::Validation(format!("invalid initiator name {:?}", empty)));
        }
        self.send(Method::POST, "iscsi/initiator", &request).await
    }

    async fn delete_iscsi_initiator(&self, id: u64) -> Result<()> {
        require_id("initiator group", id)?;
        self.delete(&format!("iscsi/initiator/id/{}", id)).await
    }

    async fn list_iscsi_targets(&self) -> Result<Vec<IscsiTarget>> {
        self.get("iscsi/target").await
    }

    async fn create_iscsi_target(&self, request: CreateTargetRequest) -> Result<IscsiTarget> {
        require_name("target name", &request.name)?;
        for group in &request.groups {
            require_id("target portal", group.portal)?;
        }
        self.send(Method::POST, "iscsi/target", &request).await
    }

    async fn delete_iscsi_target(&self, id: u64) -> Result<()> {
        require_id("target", id)?;
        self.delete(&format!("iscsi/target/id/{}", id)).await
    }

    async fn list_iscsi_extents(&self) -> Result<Vec<IscsiExtent>> {
        self.get("iscsi/extent").await
    }

    async fn create_iscsi_extent(&self, request: CreateExtentRequest) -> Result<IscsiExtent> {
        require_name("extent name", &request.name)?;
        require_name("extent disk", &request.disk)?;
        self.send(Method::POST, "iscsi/extent", &request).await
    }

    async fn delete_iscsi_extent(&self, id: u64) -> Result<()> {
        require_id("extent", id)?;
        self.delete(&format!("iscsi/extent/id/{}", id)).await
    }

    async fn list_iscsi_target_extents(&self) -> Result<Vec<IscsiTargetExtent>> {
        self.get("iscsi/targetextent").await
    }

    async fn create_iscsi_target_extent(
        &self,
        request: CreateTargetExtentRequest,
    ) -> Result<IscsiTargetExtent> {
        require_id("target", request.target)?;
        require_id("extent", request.extent)?;
        self.send(Method::POST, "iscsi/targetextent", &request).await
    }

    async fn delete_iscsi_target_extent(&self, id: u64) -> Result<()> {
        require_id("target extent", id)?;
        self.delete(&format!("iscsi/targetextent/id/{}", id)).await
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.get("service").await
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        require_name("service name", name)?;
        let services: Vec<Service> = self
            .get(&format!("service?service={}", urlencoding::encode(name)))
            .await?;
        services
            .into_iter()
            .find(|s| s.service == name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Service".into(),
                name: name.to_string(),
            })
    }

    async fn enable_service(&self, id: u64) -> Result<()> {
        require_id("service", id)?;
        let _: serde_json::Value = self
            .send(Method::PUT, &format!("service/id/{}", id), &json!({ "enable": true }))
            .await?;
        Ok(())
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        require_name("service name", name)?;
        info!("Starting service {}", name);
        let _: serde_json::Value = self
            .send(Method::POST, "service/start", &json!({ "service": name }))
            .await?;
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        require_name("service name", name)?;
        info!("Stopping service {}", name);
        let _: serde_json::Value = self
            .send(Method::POST, "service/stop", &json!({ "service": name }))
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Disks
    // -------------------------------------------------------------------------

    async fn list_disks(&self) -> Result<Vec<ApplianceDisk>> {
        self.get("disk").await
    }

    async fn list_unused_disks(&self) -> Result<Vec<ApplianceDisk>> {
        let bytes = self.request(Method::POST, "disk/get_unused", None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
