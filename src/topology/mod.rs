//! Network topology module.
//!
//! This module contains the node/connection model of a cluster fragment,
//! the merge of fragments into one network graph and the consistency checks
//! run on the merged result.

pub mod types;
pub mod merge;
pub mod validation;

// Re-export key types and functions for easier access
pub use types::{
    build_fragments, ClusterFragment, Connection, Endpoint, Node, NodeKind, OperatingSystem,
    Platform,
};
pub use merge::{merge_clusters_to_network, MergedTopology};
pub use validation::{validate_topology, TopologyError, ValidationReport};
