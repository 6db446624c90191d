//! CSI Connection Projection
//!
//! Derives the connection descriptor the downstream CSI driver needs from the
//! results of reconciliation. Pure; no appliance calls.

use crate::appliance::types::{Dataset, IscsiInitiatorGroup, IscsiPortal};
use serde::{Deserialize, Serialize};

/// Connection descriptor for the CSI driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiConnection {
    /// Bare appliance host (no scheme, port or path)
    pub host: String,
    pub api_url: String,
    pub pool: String,
    /// Parent dataset for provisioned volumes
    pub dataset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsConnection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iscsi: Option<IscsiConnection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsConnection {
    pub server: String,
    pub share_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IscsiConnection {
    /// `host:port` of the target portal
    pub target_portal: String,
    pub target_portal_group: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_group: Option<u64>,
}

/// Strip scheme, credentials, port and path from an appliance URL
pub fn bare_host(url: &str) -> String {
    let rest = url.trim();
    let rest = rest.split_once("://").map(|(_, r)| r).unwrap_or(rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().unwrap_or_default().to_string();
    }
    match authority.matches(':').count() {
        1 => authority.split(':').next().unwrap_or_default().to_string(),
        _ => authority.to_string(),
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `host:port` for the portal's first listen entry, substituting `host` for a wildcard IP
pub fn portal_address(portal: &IscsiPortal, host: &str) -> Option<String> {
    let listen = portal.listen.first()?;
    let ip = if listen.is_wildcard() { host } else { listen.ip.as_str() };
    Some(join_host_port(ip, listen.port))
}

/// Project the CSI descriptor from the reconciled resources
pub fn project(
    api_url: &str,
    pool: &str,
    dataset: &Dataset,
    nfs_enabled: bool,
    portal: Option<&IscsiPortal>,
    initiator: Option<&IscsiInitiatorGroup>,
) -> CsiConnection {
    let host = bare_host(api_url);

    let nfs = nfs_enabled.then(|| NfsConnection {
        server: host.clone(),
        share_path: dataset
            .mountpoint
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("/mnt/{}", dataset.id)),
    });

    let iscsi = portal.and_then(|portal| {
        portal_address(portal, &host).map(|target_portal| IscsiConnection {
            target_portal,
            target_portal_group: portal.tag,
            initiator_group: initiator.map(|i| i.tag),
        })
    });

    CsiConnection {
        host,
        api_url: api_url.to_string(),
        pool: pool.to_string(),
        dataset: dataset.id.clone(),
        nfs,
        iscsi,
    }
}
