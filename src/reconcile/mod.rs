//! Appliance reconciliation
//!
//! - [`reconciler`]: setup, validation and smoke-test pipelines
//! - [`ensure`]: lookup-or-create building block
//! - [`topology`]: pool layout selection
//! - [`csi`]: CSI connection projection

pub mod csi;
pub mod ensure;
pub mod reconciler;
pub mod topology;

#[cfg(test)]
pub(crate) mod fake;

pub use csi::{CsiConnection, IscsiConnection, NfsConnection};
pub use ensure::{EnsureAction, Ensured};
pub use reconciler::*;
pub use topology::{select_topology, select_topology_logged};
