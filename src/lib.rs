//! Storage Bootstrap
//!
//! Prepares storage for a Kubernetes cluster from two directions:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          storage-bootstrap                           │
//! ├──────────────────────────────────┬───────────────────────────────────┤
//! │   Appliance reconciliation       │   Node disk provisioning          │
//! │                                  │                                   │
//! │   REST client ─► Reconciler      │   SSH session ─► shell disk ops   │
//! │     pool / dataset / services    │     lsblk / parted / mkfs / mount │
//! │     iSCSI portal + initiators    │                                   │
//! │            │                     │            │                      │
//! │            ▼                     │            ▼                      │
//! │   CSI connection descriptor      │   Longhorn Node spec.disks patch  │
//! └──────────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`appliance`]: REST client and wire types for the storage appliance
//! - [`reconcile`]: idempotent setup, validation and smoke test
//! - [`provision`]: remote disk preparation and Longhorn registration
//! - [`crd`]: Longhorn Node resource
//! - [`secrets`]: API key storage and resolution
//! - [`domain`]: ports between the engine and the outside world
//! - [`config`]: YAML configuration
//! - [`error`]: error types and classification

pub mod appliance;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod provision;
pub mod reconcile;
pub mod secrets;

pub use appliance::{ApplianceClient, VdevType};
pub use config::Config;
pub use domain::ports::{
    ApplianceApi, ApplianceApiRef, DiskOperations, NodeDiskStore, Prompter, RemoteExecutor,
    SecretStore,
};
pub use error::{Error, ErrorClass, Result};
pub use provision::{DiskProvisioner, ProvisionReport, ProvisionRequest};
pub use reconcile::{CsiConnection, Reconciler, SetupReport, ValidationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
