//! Consistency checks on a merged topology.
//!
//! Checks for:
//! - labels that appear more than once
//! - host addresses that are duplicated or fall outside the management network
//! - connections whose `from_node` is not the owning node's label
//! - connections whose `to_node` names no node in the topology

use super::merge::MergedTopology;
use super::types::NodeKind;
use ipnetwork::IpNetwork;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("label {label} appears {count} times in the merged topology")]
    DuplicateLabel { label: String, count: usize },

    #[error("address {address} is assigned to both {first} and {second}")]
    DuplicateAddress {
        address: IpAddr,
        first: String,
        second: String,
    },

    #[error("host {label} has address {address} outside the management network {block}")]
    AddressOutsideBlock {
        label: String,
        address: IpAddr,
        block: IpNetwork,
    },

    #[error("connection of node {owner} carries stale source label {from_node}")]
    StaleSourceLabel { owner: String, from_node: String },

    #[error("node {from} has a connection to {to}, which is not in the topology")]
    DanglingReference { from: String, to: String },

    #[error("label {label} names {first} in cluster {first_cluster} and a different node {second} in cluster {second_cluster}")]
    ConflictingCopies {
        label: String,
        first_cluster: IpAddr,
        first: IpAddr,
        second_cluster: IpAddr,
        second: IpAddr,
    },
}

/// Figures gathered while validating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub nodes: usize,
    pub connections: usize,
    pub hosts: usize,
}

/// Validate a merged topology, stopping at the first inconsistency
pub fn validate_topology(
    topology: &MergedTopology,
    management_net: &IpNetwork,
) -> Result<ValidationReport, TopologyError> {
    let mut label_counts: HashMap<&str, usize> = HashMap::new();
    for node in topology.nodes() {
        *label_counts.entry(node.label.as_str()).or_insert(0) += 1;
    }
    // report in node order so the first offender is deterministic
    for node in topology.nodes() {
        let count = label_counts[node.label.as_str()];
        if count > 1 {
            return Err(TopologyError::DuplicateLabel {
                label: node.label.clone(),
                count,
            });
        }
    }

    let labels: HashSet<&str> = label_counts.keys().copied().collect();
    let mut host_addresses: HashMap<IpAddr, &str> = HashMap::new();
    let mut report = ValidationReport::default();

    for node in topology.nodes() {
        report.nodes += 1;

        if node.kind() == NodeKind::Host {
            report.hosts += 1;
            if !management_net.contains(node.testbed_ip) {
                return Err(TopologyError::AddressOutsideBlock {
                    label: node.label.clone(),
                    address: node.testbed_ip,
                    block: *management_net,
                });
            }
            if let Some(first) = host_addresses.insert(node.testbed_ip, node.label.as_str()) {
                return Err(TopologyError::DuplicateAddress {
                    address: node.testbed_ip,
                    first: first.to_string(),
                    second: node.label.clone(),
                });
            }
        }

        for connection in &node.connections {
            report.connections += 1;
            if connection.from_node != node.label {
                return Err(TopologyError::StaleSourceLabel {
                    owner: node.label.clone(),
                    from_node: connection.from_node.clone(),
                });
            }
            if let Some(to) = &connection.to_node {
                if !labels.contains(to.as_str()) {
                    return Err(TopologyError::DanglingReference {
                        from: node.label.clone(),
                        to: to.clone(),
                    });
                }
            }
        }
    }

    log::info!(
        "Topology is consistent: {} nodes ({} hosts), {} connections",
        report.nodes,
        report.hosts,
        report.connections
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::types::{ClusterFragment, Connection, Endpoint, Node, OperatingSystem, Platform};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn block() -> IpNetwork {
        "10.0.0.0/24".parse().unwrap()
    }

    fn host(label: &str, address: &str) -> Node {
        Node::new(label, ip(address), Platform::Mininet, OperatingSystem::Linux)
    }

    fn link(to: &str) -> Connection {
        Connection::new(to, Endpoint::Interface("eth0".into()), Endpoint::Interface("eth1".into()))
    }

    fn topology(nodes: Vec<Node>) -> MergedTopology {
        MergedTopology::merge(vec![ClusterFragment::from_template(ip("192.168.1.10"), &nodes)]).unwrap()
    }

    #[test]
    fn test_consistent_topology() {
        let topology = topology(vec![
            host("00000001", "10.0.0.1").with_connection(link("00000003")),
            host("00000003", "10.0.0.3").with_connection(link("00000001")),
        ]);
        let report = validate_topology(&topology, &block()).unwrap();
        assert_eq!(report, ValidationReport { nodes: 2, connections: 2, hosts: 2 });
    }

    #[test]
    fn test_dangling_reference() {
        let topology = topology(vec![host("00000001", "10.0.0.1").with_connection(link("ghost"))]);
        let err = validate_topology(&topology, &block()).unwrap_err();
        assert_eq!(err, TopologyError::DanglingReference { from: "00000001".into(), to: "ghost".into() });
    }

    #[test]
    fn test_duplicate_label() {
        let topology = topology(vec![host("X", "10.0.0.1"), host("X", "10.0.0.3")]);
        assert!(matches!(
            validate_topology(&topology, &block()),
            Err(TopologyError::DuplicateLabel { count: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_and_outside_addresses() {
        let duplicate = topology(vec![host("a", "10.0.0.1"), host("b", "10.0.0.1")]);
        assert!(matches!(
            validate_topology(&duplicate, &block()),
            Err(TopologyError::DuplicateAddress { .. })
        ));

        let outside = topology(vec![host("a", "10.0.1.1")]);
        assert!(matches!(
            validate_topology(&outside, &block()),
            Err(TopologyError::AddressOutsideBlock { .. })
        ));
    }

    #[test]
    fn test_stale_source_label() {
        let mut node = host("00000001", "10.0.0.1").with_connection(link("00000001"));
        node.label = "00000005".to_string();
        let topology = topology(vec![node]);
        assert!(matches!(
            validate_topology(&topology, &block()),
            Err(TopologyError::StaleSourceLabel { .. })
        ));
    }
}
