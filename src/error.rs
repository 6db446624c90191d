//! Error types for the storage bootstrap engine
//!
//! Provides structured error types for the appliance client, the reconciler,
//! the remote disk provisioner and the cluster resource updates.

use std::fmt;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration / Input Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid selection: {0}")]
    Selection(String),

    // =========================================================================
    // Appliance Errors
    // =========================================================================
    #[error("Cannot reach appliance at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Appliance error: {0}")]
    Appliance(#[from] ApplianceError),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Requirement not met: {requirement}")]
    RequirementUnmet { requirement: String },

    #[error("No unused disks available on the appliance to create pool {pool}")]
    NoUnusedDisks { pool: String },

    #[error("Smoke test failed at {stage}: {reason}")]
    SmokeTest { stage: String, reason: String },

    // =========================================================================
    // Remote Host Errors
    // =========================================================================
    #[error("Remote session to {host} failed: {reason}")]
    Session { host: String, reason: String },

    #[error("Remote command `{command}` exited with {exit_code}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Device not found on host: {device}")]
    DiskNotFound { device: String },

    #[error("Device {device} is not available: {reason}")]
    DiskUnavailable { device: String, reason: String },

    #[error("Provisioning of {device} failed after {completed} completed disk(s): {source}")]
    DiskProvisioning {
        device: String,
        completed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation aborted: {0}")]
    Aborted(String),

    // =========================================================================
    // Kubernetes / Secret Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Secret error: {0}")]
    Secret(String),

    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of an appliance error response.
///
/// `Structured` is only chosen when the body decodes into the appliance's
/// error schema and carries a non-empty message; the status code alone never
/// decides the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplianceErrorBody {
    Structured { message: String },
    Raw { status: u16, body: String },
}

/// An HTTP error (status >= 400) returned by the appliance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceError {
    pub status: u16,
    pub body: ApplianceErrorBody,
}

impl ApplianceError {
    pub fn message(&self) -> &str {
        match &self.body {
            ApplianceErrorBody::Structured { message } => message,
            ApplianceErrorBody::Raw { body, .. } => body,
        }
    }
}

impl fmt::Display for ApplianceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ApplianceErrorBody::Structured { message } => write!(f, "{}", message),
            ApplianceErrorBody::Raw { status, body } => write!(f, "status {}: {}", status, body),
        }
    }
}

impl std::error::Error for ApplianceError {}

/// Severity class of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Cannot reach or authenticate against a backend; abort immediately
    FatalConnection,
    /// A required resource is missing or could not be created
    FatalResource,
    /// Rejected locally before any remote call
    InputValidation,
    /// The operator declined or the run was cancelled
    Aborted,
}

impl Error {
    /// Classify this error for reporting
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Connection { .. } | Error::Session { .. } | Error::Kube(_) => {
                ErrorClass::FatalConnection
            }

            Error::Appliance(e) if e.status == 401 || e.status == 403 => {
                ErrorClass::FatalConnection
            }

            Error::Configuration(_)
            | Error::Validation(_)
            | Error::Selection(_)
            | Error::DiskNotFound { .. }
            | Error::DiskUnavailable { .. } => ErrorClass::InputValidation,

            Error::Aborted(_) | Error::Cancelled => ErrorClass::Aborted,

            Error::DiskProvisioning { source, .. } => source.class(),

            _ => ErrorClass::FatalResource,
        }
    }

    /// Whether this error means "the probed resource does not exist".
    ///
    /// Existence probes create on demand only when this is true; every other
    /// error propagates unchanged.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Appliance(e) => {
                if e.status == 404 {
                    return true;
                }
                let message = e.message().to_ascii_lowercase();
                message.contains("does not exist") || message.contains("not found")
            }
            _ => false,
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
