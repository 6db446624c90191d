//! Remote disk provisioning for Longhorn nodes
//!
//! - [`inventory`]: lsblk parsing, free-disk rules, selection, naming
//! - [`shell`]: disk operations as shell commands over a remote executor
//! - [`ssh`]: control-master SSH session
//! - [`provisioner`]: the per-disk workflow
//! - [`node_disks`]: Longhorn node `spec.disks` merge

pub mod inventory;
pub mod node_disks;
pub mod provisioner;
pub mod shell;
pub mod ssh;

pub use node_disks::{register_disks, DiskMergePlan, KubeNodeDiskStore};
pub use provisioner::*;
pub use shell::ShellDiskOperations;
pub use ssh::SshSession;
