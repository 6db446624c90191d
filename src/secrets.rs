//! Appliance credential storage
//!
//! The API key lives under a logical path (`storage/appliance`, key
//! `api-key`). The Kubernetes store maps the path onto a Secret name by
//! replacing `/` with `-`.

use crate::domain::ports::SecretStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info};

pub const API_KEY_PATH: &str = "storage/appliance";
pub const API_KEY_FIELD: &str = "api-key";

const FIELD_MANAGER: &str = "storage-bootstrap";

/// Secret object name for a logical path
pub fn secret_name(path: &str) -> String {
    path.trim_matches('/').replace('/', "-")
}

// =============================================================================
// Kubernetes Secret Store
// =============================================================================

pub struct KubeSecretStore {
    api: Api<Secret>,
}

impl KubeSecretStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn read(&self, path: &str, key: &str) -> Result<Option<String>> {
        let name = secret_name(path);
        let secret = match self.api.get(&name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Secret {} not found", name);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) else {
            return Ok(None);
        };
        let value = String::from_utf8(value.0.clone())
            .map_err(|_| Error::Secret(format!("{}/{} is not valid UTF-8", name, key)))?;
        Ok(Some(value))
    }

    async fn write(&self, path: &str, key: &str, value: &str) -> Result<()> {
        let name = secret_name(path);
        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": name },
            "type": "Opaque",
            "stringData": { key: value }
        });
        self.api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await?;
        info!("Stored {} in Secret {}", key, name);
        Ok(())
    }
}

// =============================================================================
// API Key Resolution
// =============================================================================

/// Pick the API key: config, then environment/flag, then the secret store
pub async fn resolve_api_key(
    from_config: Option<&str>,
    from_env: Option<&str>,
    store: Option<&dyn SecretStore>,
) -> Result<String> {
    let explicit = [from_config, from_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty());
    if let Some(key) = explicit {
        return Ok(key.to_string());
    }

    if let Some(store) = store {
        if let Some(key) = store.read(API_KEY_PATH, API_KEY_FIELD).await? {
            let key = key.trim();
            if !key.is_empty() {
                debug!("Using appliance API key from the secret store");
                return Ok(key.to_string());
            }
        }
    }

    Err(Error::Configuration(
        "no appliance API key: set appliance.api_key, STORAGE_APPLIANCE_API_KEY, \
         or store one with --save-api-key"
            .to_string(),
    ))
}
