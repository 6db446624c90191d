//! Cluster resource types
//!
//! - Node (longhorn.io/v1beta2): per-node disk inventory managed by Longhorn

pub mod longhorn_node;

pub use longhorn_node::*;
