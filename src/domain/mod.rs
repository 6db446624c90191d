//! Ports between the engine and the outside world
//!
//! The reconciler and the provisioner only talk to these traits; the
//! appliance client, SSH session and kube stores are the adapters.

pub mod ports;

pub use ports::*;
