//! Storage Appliance Adapter
//!
//! REST binding to the network-attached storage appliance:
//! - `types`: wire types for pools, datasets, shares, iSCSI objects, services
//! - `client`: bearer-authenticated HTTP client with typed error decoding

pub mod client;
pub mod types;

pub use client::*;
pub use types::*;
