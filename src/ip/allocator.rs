//! Cluster address allocation.
//!
//! Every cluster receives a disjoint range of the management network. The
//! nodes of each fragment are then walked in order: mininet hosts take the
//! next address from the cluster cursor, SDN switches take the cluster
//! anchor address, and physical SDN nodes keep their address but get a
//! cluster-specific port. A relabeled node first restamps its own
//! connections and then fixes every reverse reference held by the other
//! nodes of the fragment.

use super::error::PlanError;
use super::label::{
    advance, first_assignable, host_label_words, label_from_address, switch_label_words,
    DEFAULT_LABEL_LEN,
};
use super::registry::AddressRegistry;
use crate::topology::types::{ClusterFragment, Endpoint, Node, NodeKind};
use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::IpAddr;

/// Address units reserved for every address-consuming node (endpoint + NAP pair)
pub const ADDRESS_UNITS_PER_HOST: u64 = 2;

/// Counters reported by a completed allocation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationSummary {
    pub clusters: usize,
    pub hosts: usize,
    pub switches: usize,
    pub sdn_nodes: usize,
}

/// Assigns addresses, labels and ports to the fragments of one network
#[derive(Debug, Clone)]
pub struct ClusterAllocator {
    management_net: IpNetwork,
}

impl ClusterAllocator {
    pub fn new(management_net: IpNetwork) -> Self {
        Self { management_net }
    }

    pub fn management_net(&self) -> &IpNetwork {
        &self.management_net
    }

    /// Compute `start_ip` for every fragment. Fragment `k` starts where the
    /// range consumed by fragment `k - 1` ends.
    pub fn plan_start_addresses(&self, fragments: &mut [ClusterFragment]) -> Result<(), PlanError> {
        let mut start = first_assignable(&self.management_net)?;
        for (index, fragment) in fragments.iter_mut().enumerate() {
            let consumed = fragment.refresh_host_count() as u64 * ADDRESS_UNITS_PER_HOST;
            self.ensure_range_fits(start, consumed)?;
            fragment.start_ip = Some(start);
            debug!(
                "cluster {} ({}): start ip {}, {} address units",
                index, fragment.cluster_ip, start, consumed
            );
            start = advance(start, consumed).map_err(|_| self.exhausted(start))?;
        }
        Ok(())
    }

    /// Assign addresses and labels to every node of every fragment.
    ///
    /// Running this twice over the same fragments produces the same result.
    pub fn update_clusters(
        &self,
        fragments: &mut [ClusterFragment],
    ) -> Result<AllocationSummary, PlanError> {
        info!(
            "Allocating {} clusters in management network {}",
            fragments.len(),
            self.management_net
        );
        self.plan_start_addresses(fragments)?;

        let mut registry = AddressRegistry::new();
        let mut summary = AllocationSummary {
            clusters: fragments.len(),
            ..AllocationSummary::default()
        };
        for (index, fragment) in fragments.iter_mut().enumerate() {
            self.allocate_fragment(index, fragment, &mut registry, &mut summary)?;
        }

        info!(
            "Allocated {} hosts, {} switches and {} SDN nodes across {} clusters",
            summary.hosts, summary.switches, summary.sdn_nodes, summary.clusters
        );
        Ok(summary)
    }

    fn allocate_fragment(
        &self,
        index: usize,
        fragment: &mut ClusterFragment,
        registry: &mut AddressRegistry,
        summary: &mut AllocationSummary,
    ) -> Result<(), PlanError> {
        let cluster_ip = fragment.cluster_ip;
        let mut cursor = match fragment.start_ip {
            Some(start) => start,
            None => first_assignable(&self.management_net)?,
        };
        let referrers = ReferrerIndex::build(&fragment.nodes);

        for position in 0..fragment.nodes.len() {
            let node = &mut fragment.nodes[position];
            let old_label = node.label.clone();
            let mut derived_port = None;

            match node.kind() {
                NodeKind::Host => {
                    if !self.management_net.contains(cursor) {
                        return Err(self.exhausted(cursor));
                    }
                    node.testbed_ip = cursor;
                    node.label = label_from_address(cursor, host_label_words(&cursor), DEFAULT_LABEL_LEN)?;
                    registry.register(cursor, &node.label)?;
                    cursor = advance(cursor, ADDRESS_UNITS_PER_HOST).map_err(|_| self.exhausted(cursor))?;
                    summary.hosts += 1;
                }
                NodeKind::Switch => {
                    node.testbed_ip = cluster_ip;
                    node.label = label_from_address(cluster_ip, switch_label_words(&cluster_ip), DEFAULT_LABEL_LEN)?;
                    summary.switches += 1;
                }
                NodeKind::SdnPhysical => {
                    let (port, bridge) = cluster_port(node, index)?;
                    for connection in &mut node.connections {
                        connection.source = Endpoint::Port(port);
                        connection.bridge = bridge.clone();
                    }
                    derived_port = Some(port);
                    summary.sdn_nodes += 1;
                }
                NodeKind::Other => {}
            }

            debug!(
                "cluster {}: {} -> label {}, testbed_ip {}, platform {:?}",
                index, old_label, node.label, node.testbed_ip, node.platform
            );

            let new_label = node.label.clone();
            for connection in &mut node.connections {
                connection.from_node = new_label.clone();
            }

            for &(peer, slot) in referrers.referrers_of(position) {
                let connection = &mut fragment.nodes[peer].connections[slot];
                connection.to_node = Some(new_label.clone());
                if let Some(port) = derived_port {
                    connection.destination = Endpoint::Port(port);
                }
            }
        }
        Ok(())
    }

    fn ensure_range_fits(&self, start: IpAddr, consumed: u64) -> Result<(), PlanError> {
        if consumed == 0 {
            return Ok(());
        }
        let last = advance(start, consumed - 1).map_err(|_| self.exhausted(start))?;
        for address in [start, last] {
            if !self.management_net.contains(address) {
                return Err(self.exhausted(address));
            }
        }
        Ok(())
    }

    fn exhausted(&self, address: IpAddr) -> PlanError {
        PlanError::AddressSpaceExhausted {
            address,
            block: self.management_net,
        }
    }
}

/// Port and bridge a physical SDN node uses inside cluster `index`
fn cluster_port(node: &Node, index: usize) -> Result<(u16, String), PlanError> {
    let missing = || PlanError::MissingBasePort {
        label: node.label.clone(),
    };
    let base = node.base_src_port.ok_or_else(missing)?;
    let bridge = node
        .connections
        .first()
        .map(|connection| connection.bridge.clone())
        .ok_or_else(missing)?;
    let port = u16::try_from(index)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| PlanError::PortOverflow {
            label: node.label.clone(),
            base,
            offset: index,
        })?;
    Ok((port, bridge))
}

/// For every node of a fragment, the `(node, connection)` positions that
/// reference it. Labels are resolved once, before any relabeling, so a
/// label reused mid-pass cannot redirect an edge to the wrong node.
struct ReferrerIndex {
    referrers: Vec<Vec<(usize, usize)>>,
}

impl ReferrerIndex {
    fn build(nodes: &[Node]) -> Self {
        let mut by_label: HashMap<&str, usize> = HashMap::new();
        for (position, node) in nodes.iter().enumerate() {
            if by_label.contains_key(node.label.as_str()) {
                warn!(
                    "label {} appears more than once in a cluster, references resolve to the first node",
                    node.label
                );
                continue;
            }
            by_label.insert(node.label.as_str(), position);
        }

        let mut referrers = vec![Vec::new(); nodes.len()];
        for (peer, node) in nodes.iter().enumerate() {
            for (slot, connection) in node.connections.iter().enumerate() {
                let target = connection
                    .to_node
                    .as_deref()
                    .and_then(|label| by_label.get(label));
                match target {
                    Some(&target) if target != peer => referrers[target].push((peer, slot)),
                    _ => {}
                }
            }
        }
        Self { referrers }
    }

    fn referrers_of(&self, position: usize) -> &[(usize, usize)] {
        &self.referrers[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::types::{build_fragments, Connection, OperatingSystem, Platform};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn iface(name: &str) -> Endpoint {
        Endpoint::Interface(name.to_string())
    }

    fn host(label: &str, address: &str) -> Node {
        Node::new(label, ip(address), Platform::Mininet, OperatingSystem::Linux)
    }

    fn switch(label: &str, address: &str) -> Node {
        Node::new(label, ip(address), Platform::Mininet, OperatingSystem::Ovs)
    }

    /// Host A <-> switch B
    fn host_switch_template() -> Vec<Node> {
        vec![
            host("A", "10.0.0.1").with_connection(Connection::new("B", iface("eth1"), iface("a-eth0"))),
            switch("B", "192.168.1.10").with_connection(Connection::new("A", iface("a-eth0"), iface("eth1"))),
        ]
    }

    #[test]
    fn test_start_addresses_two_single_host_clusters() {
        let template = vec![host("A", "10.0.0.1")];
        let mut fragments = build_fragments(&[ip("192.168.1.10"), ip("192.168.1.20")], &template);
        let allocator = ClusterAllocator::new(net("10.0.0.0/24"));

        allocator.plan_start_addresses(&mut fragments).unwrap();
        assert_eq!(fragments[0].start_ip, Some(ip("10.0.0.1")));
        assert_eq!(fragments[1].start_ip, Some(ip("10.0.0.3")));
    }

    #[test]
    fn test_start_ranges_are_increasing_and_disjoint() {
        let template = vec![host("A", "10.0.0.1"), host("B", "10.0.0.3"), host("C", "10.0.0.5")];
        let clusters: Vec<IpAddr> = (1..=6).map(|i| ip(&format!("192.168.1.{}", i))).collect();
        let mut fragments = build_fragments(&clusters, &template);
        let allocator = ClusterAllocator::new(net("10.0.0.1/24"));

        allocator.plan_start_addresses(&mut fragments).unwrap();
        for pair in fragments.windows(2) {
            let start = u32::from(match pair[0].start_ip.unwrap() {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => unreachable!(),
            });
            let next = u32::from(match pair[1].start_ip.unwrap() {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => unreachable!(),
            });
            let end = start + pair[0].host_count as u32 * ADDRESS_UNITS_PER_HOST as u32;
            assert!(next > start);
            assert!(next >= end);
        }
    }

    #[test]
    fn test_host_and_switch_relabeling() {
        let mut fragments =
            build_fragments(&[ip("192.168.1.10"), ip("192.168.1.20")], &host_switch_template());
        let allocator = ClusterAllocator::new(net("10.0.0.0/24"));
        let summary = allocator.update_clusters(&mut fragments).unwrap();

        assert_eq!(summary.hosts, 2);
        assert_eq!(summary.switches, 2);

        let first = &fragments[0];
        assert_eq!(first.nodes[0].label, "00000001");
        assert_eq!(first.nodes[0].testbed_ip, ip("10.0.0.1"));
        assert_eq!(first.nodes[1].label, "00000010");
        assert_eq!(first.nodes[1].testbed_ip, ip("192.168.1.10"));

        let second = &fragments[1];
        assert_eq!(second.nodes[0].label, "00000003");
        assert_eq!(second.nodes[0].testbed_ip, ip("10.0.0.3"));
        assert_eq!(second.nodes[1].label, "00000020");

        // both directions point at the current labels
        assert_eq!(second.nodes[0].connections[0].from_node, "00000003");
        assert_eq!(second.nodes[0].connections[0].to_node.as_deref(), Some("00000020"));
        assert_eq!(second.nodes[1].connections[0].from_node, "00000020");
        assert_eq!(second.nodes[1].connections[0].to_node.as_deref(), Some("00000003"));
    }

    #[test]
    fn test_one_directional_reference_is_rewritten() {
        let template = vec![
            host("A", "10.0.0.1").with_connection(Connection::new("B", iface("eth0"), iface("eth0"))),
            host("B", "10.0.0.3"),
        ];
        let mut fragments = build_fragments(&[ip("192.168.1.10")], &template);
        ClusterAllocator::new(net("10.0.0.0/24"))
            .update_clusters(&mut fragments)
            .unwrap();

        assert_eq!(fragments[0].nodes[1].label, "00000003");
        assert_eq!(fragments[0].nodes[0].connections[0].to_node.as_deref(), Some("00000003"));
    }

    #[test]
    fn test_swapped_template_labels_keep_edges_intact() {
        // A is declared with the label B will receive, and vice versa
        let template = vec![
            host("00000003", "10.0.0.9").with_connection(Connection::new("00000001", iface("eth0"), iface("eth0"))),
            host("00000001", "10.0.0.7").with_connection(Connection::new("00000003", iface("eth0"), iface("eth0"))),
        ];
        let mut fragments = build_fragments(&[ip("192.168.1.10")], &template);
        ClusterAllocator::new(net("10.0.0.0/24"))
            .update_clusters(&mut fragments)
            .unwrap();

        let nodes = &fragments[0].nodes;
        assert_eq!(nodes[0].label, "00000001");
        assert_eq!(nodes[1].label, "00000003");
        assert_eq!(nodes[0].connections[0].to_node.as_deref(), Some("00000003"));
        assert_eq!(nodes[1].connections[0].to_node.as_deref(), Some("00000001"));
    }

    #[test]
    fn test_sdn_physical_port_derivation() {
        let physical = Node::new("00000100", ip("10.0.1.100"), Platform::Physical, OperatingSystem::Ovs)
            .with_connection({
                let mut connection = Connection::new("A", Endpoint::Port(3), iface("eth1"));
                connection.bridge = "br-icn".to_string();
                connection
            });
        let template = vec![
            physical,
            host("A", "10.0.0.1").with_connection(Connection::new("00000100", iface("eth1"), Endpoint::Port(3))),
        ];
        let clusters = [ip("192.168.1.10"), ip("192.168.1.20"), ip("192.168.1.30")];
        let mut fragments = build_fragments(&clusters, &template);
        let summary = ClusterAllocator::new(net("10.0.0.0/24"))
            .update_clusters(&mut fragments)
            .unwrap();
        assert_eq!(summary.sdn_nodes, 3);

        for (index, fragment) in fragments.iter().enumerate() {
            let expected = 3 + index as u16;
            let physical = &fragment.nodes[0];
            assert_eq!(physical.testbed_ip, ip("10.0.1.100"));
            assert_eq!(physical.label, "00000100");
            assert_eq!(physical.connections[0].source, Endpoint::Port(expected));
            assert_eq!(physical.connections[0].bridge, "br-icn");
            assert_eq!(physical.connections[0].to_node.as_deref(), Some(fragment.nodes[1].label.as_str()));

            let host = &fragment.nodes[1];
            assert_eq!(host.connections[0].destination, Endpoint::Port(expected));
            assert_eq!(host.connections[0].to_node.as_deref(), Some("00000100"));
        }
    }

    #[test]
    fn test_sdn_physical_without_port_is_rejected() {
        let template = vec![Node::new("P", ip("10.0.1.100"), Platform::Physical, OperatingSystem::Ovs)];
        let mut fragments = build_fragments(&[ip("192.168.1.10")], &template);
        let err = ClusterAllocator::new(net("10.0.0.0/24"))
            .update_clusters(&mut fragments)
            .unwrap_err();
        assert!(matches!(err, PlanError::MissingBasePort { .. }));
    }

    #[test]
    fn test_address_space_exhaustion() {
        let template = vec![host("A", "10.0.0.1"), host("B", "10.0.0.3")];
        let clusters: Vec<IpAddr> = (1..=3).map(|i| ip(&format!("192.168.1.{}", i))).collect();
        let mut fragments = build_fragments(&clusters, &template);
        // 10.0.0.0/29 offers 10.0.0.1..10.0.0.7, the second cluster's range ends at 10.0.0.8
        let err = ClusterAllocator::new(net("10.0.0.0/29"))
            .update_clusters(&mut fragments)
            .unwrap_err();
        assert!(matches!(err, PlanError::AddressSpaceExhausted { .. }));
    }

    #[test]
    fn test_update_clusters_is_idempotent() {
        let mut template = host_switch_template();
        template.push(
            Node::new("P", ip("10.0.1.100"), Platform::Physical, OperatingSystem::Ovs)
                .with_connection(Connection::new("A", Endpoint::Port(7), iface("eth2"))),
        );
        let mut fragments =
            build_fragments(&[ip("192.168.1.10"), ip("192.168.1.20")], &template);
        let allocator = ClusterAllocator::new(net("10.0.0.0/24"));

        allocator.update_clusters(&mut fragments).unwrap();
        let once = fragments.clone();
        allocator.update_clusters(&mut fragments).unwrap();
        assert_eq!(once, fragments);
    }

    #[test]
    fn test_ipv6_hosts_get_distinct_labels() {
        let mut fragments = build_fragments(&[ip("fd00:1::10"), ip("fd00:1::20")], &host_switch_template());
        let summary = ClusterAllocator::new(net("fd00::/64"))
            .update_clusters(&mut fragments)
            .unwrap();
        assert_eq!(summary.hosts, 2);

        assert_eq!(fragments[0].nodes[0].testbed_ip, ip("fd00::1"));
        assert_eq!(fragments[0].nodes[0].label, "00000001");
        assert_eq!(fragments[1].nodes[0].testbed_ip, ip("fd00::3"));
        assert_eq!(fragments[1].nodes[0].label, "00000003");
        // switch labels come from the last segment of the cluster address
        assert_eq!(fragments[0].nodes[1].label, "00000016");
        assert_eq!(fragments[1].nodes[1].label, "00000032");
        assert_eq!(fragments[1].nodes[0].connections[0].to_node.as_deref(), Some("00000032"));
    }

    #[test]
    fn test_other_nodes_untouched() {
        let template = vec![Node::new("server", ip("172.16.0.5"), Platform::Physical, OperatingSystem::Linux)];
        let mut fragments = build_fragments(&[ip("192.168.1.10")], &template);
        let summary = ClusterAllocator::new(net("10.0.0.0/24"))
            .update_clusters(&mut fragments)
            .unwrap();
        assert_eq!(summary.hosts, 0);
        assert_eq!(fragments[0].nodes[0].label, "server");
        assert_eq!(fragments[0].nodes[0].testbed_ip, ip("172.16.0.5"));
    }
}
