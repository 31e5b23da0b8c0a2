//! # icnsim - Network configuration generator for emulated ICN clusters
//!
//! This library plans the network of an information-centric testbed built
//! from several emulation clusters. One node template is replicated per
//! cluster, every copy gets its own disjoint slice of the management
//! network, nodes shared between clusters are merged, and the result is
//! written as the configuration file the forwarding engine reads at start-up.
//!
//! ## Key Features
//!
//! - **Address Planning**: Disjoint per-cluster ranges, two addresses per host
//! - **Deterministic Labels**: Fixed-length node identifiers derived from addresses
//! - **Consistent Links**: Peer references follow every relabel, SDN ports get
//!   a per-cluster offset
//! - **Graph Merging**: Cross-cluster copies of a node collapse into one
//! - **NAP Deployment**: Per-NAP configuration files shipped to each cluster host
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: Typed configuration structures and load-time validation
//! - `config_loader`: JSON/YAML configuration file loading
//! - `topology`: Node and connection model, merging and consistency checks
//! - `ip`: Labels, address cursors and the cluster allocator
//! - `render`: libconfig output for the network and the NAPs
//! - `delivery`: Remote file delivery over SSH on a bounded worker pool
//! - `orchestrator`: High-level orchestration of both pipelines
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use icnsim::{config_loader, orchestrator};
//! use std::path::Path;
//!
//! let settings = config_loader::load_topology_config(Path::new("icn.json"))?;
//! let summary = orchestrator::generate_network_config(&settings)?;
//! println!("wrote {:?}", summary.config_path);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```json
//! {
//!   "ROOT_DIR": "/home/icn/",
//!   "WRITE_TOPO": "blackadder/deployment",
//!   "MANAGEMENT_NET": "10.0.0.1/24",
//!   "CLICK_GLOBAL_CONF": {"BLACKADDER_ID_LENGTH": 8},
//!   "clusters": [{"cluster_ip": "192.168.1.10"}, {"cluster_ip": "192.168.1.20"}],
//!   "cluster_topology": [
//!     {"label": "00000001", "testbed_ip": "10.0.0.1", "platform": "mininet",
//!      "connections": [{"to": "00000100", "src_if": "nap1-eth1", "dst_pt": 3}]}
//!   ]
//! }
//! ```
//!
//! ## Error Handling
//!
//! Each module reports its own `thiserror` enum; the orchestrator and the
//! binary wrap them into `color_eyre` reports with context.

pub mod config;
pub mod config_loader;
pub mod topology;
pub mod ip;
pub mod render;
pub mod delivery;
pub mod orchestrator;
