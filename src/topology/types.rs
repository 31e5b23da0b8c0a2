//! Topology type definitions.
//!
//! Nodes, their directed connections and the per-cluster fragments that
//! hold them. A connection is owned by the node on its "from" side; the
//! reverse direction is a separate record owned by the peer, and the two are
//! correlated only through labels.

use std::fmt;
use std::net::IpAddr;

/// Default node name used by the downstream configuration parser
pub const DEFAULT_NODE_NAME: &str = "nap";
/// Default bridge name for connections and SDN nodes
pub const DEFAULT_BRIDGE: &str = "br";
/// Default running mode of the forwarding engine on a node
pub const DEFAULT_RUNNING_MODE: &str = "user";
/// Default SDN implementation for `ovs` nodes
pub const DEFAULT_SDN_IMPLEMENTATION: &str = "ports";

/// Platform a node is instantiated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Emulated host inside a mininet cluster
    Mininet,
    /// Software switch (e.g. Open vSwitch) managed by the cluster
    SoftwareSwitch,
    /// Physical machine outside the emulation harness
    #[default]
    Physical,
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "mininet" => Platform::Mininet,
            "ovs" | "switch" | "software_switch" => Platform::SoftwareSwitch,
            _ => Platform::Physical,
        }
    }
}

/// Operating system declared for a node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperatingSystem {
    #[default]
    Linux,
    Darwin,
    /// Open vSwitch backed SDN node
    Ovs,
    Other(String),
}

impl OperatingSystem {
    /// Operating systems whose nodes consume addresses from the cluster block
    pub fn is_host_os(&self) -> bool {
        matches!(self, OperatingSystem::Linux | OperatingSystem::Darwin)
    }
}

impl From<&str> for OperatingSystem {
    fn from(value: &str) -> Self {
        match value {
            "Linux" => OperatingSystem::Linux,
            "Darwin" => OperatingSystem::Darwin,
            "ovs" => OperatingSystem::Ovs,
            other => OperatingSystem::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingSystem::Linux => write!(f, "Linux"),
            OperatingSystem::Darwin => write!(f, "Darwin"),
            OperatingSystem::Ovs => write!(f, "ovs"),
            OperatingSystem::Other(name) => write!(f, "{}", name),
        }
    }
}

/// How the allocator treats a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Emulated Linux/Darwin host: takes the next address from the cluster cursor
    Host,
    /// Emulated SDN switch: takes the cluster anchor address
    Switch,
    /// Physical SDN node: keeps its address, gets a per-cluster port
    SdnPhysical,
    /// Left untouched by allocation
    Other,
}

/// One side of a connection: an interface name or a numeric port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Interface(String),
    Port(u16),
}

impl Endpoint {
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Port(port) => Some(*port),
            Endpoint::Interface(_) => None,
        }
    }
}

/// Directed adjacency record owned by the node on its "from" side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Label of the owning node, maintained by the owner
    pub from_node: String,
    /// Label of the peer node
    pub to_node: Option<String>,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub name: String,
    pub bridge: String,
}

impl Connection {
    pub fn new(to_node: impl Into<String>, source: Endpoint, destination: Endpoint) -> Self {
        Self {
            from_node: String::new(),
            to_node: Some(to_node.into()),
            source,
            destination,
            name: DEFAULT_NODE_NAME.to_string(),
            bridge: DEFAULT_BRIDGE.to_string(),
        }
    }

    pub fn points_to(&self, label: &str) -> bool {
        self.to_node.as_deref() == Some(label)
    }
}

/// One addressable entity in the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub label: String,
    pub platform: Platform,
    pub operating_system: OperatingSystem,
    pub testbed_ip: IpAddr,
    pub running_mode: String,
    pub role: Vec<String>,
    pub name: String,
    pub sdn_implementation: Option<String>,
    pub bridge: Option<String>,
    pub promisc: bool,
    pub connections: Vec<Connection>,
    /// Source port of the first declared connection, before any per-cluster offset
    pub base_src_port: Option<u16>,
}

impl Node {
    /// Create a node with the documented defaults for every optional attribute
    pub fn new(
        label: impl Into<String>,
        testbed_ip: IpAddr,
        platform: Platform,
        operating_system: OperatingSystem,
    ) -> Self {
        let sdn = operating_system == OperatingSystem::Ovs;
        Self {
            label: label.into(),
            platform,
            operating_system,
            testbed_ip,
            running_mode: DEFAULT_RUNNING_MODE.to_string(),
            role: Vec::new(),
            name: DEFAULT_NODE_NAME.to_string(),
            sdn_implementation: sdn.then(|| DEFAULT_SDN_IMPLEMENTATION.to_string()),
            bridge: sdn.then(|| DEFAULT_BRIDGE.to_string()),
            promisc: false,
            connections: Vec::new(),
            base_src_port: None,
        }
    }

    /// Append a connection, stamping it with this node's label
    pub fn with_connection(mut self, mut connection: Connection) -> Self {
        connection.from_node = self.label.clone();
        if self.connections.is_empty() {
            self.base_src_port = connection.source.port();
        }
        self.connections.push(connection);
        self
    }

    pub fn kind(&self) -> NodeKind {
        match (self.platform, &self.operating_system) {
            (Platform::Mininet, os) if os.is_host_os() => NodeKind::Host,
            (Platform::Mininet | Platform::SoftwareSwitch, OperatingSystem::Ovs) => NodeKind::Switch,
            (Platform::Physical, OperatingSystem::Ovs) => NodeKind::SdnPhysical,
            _ => NodeKind::Other,
        }
    }

    /// SDN-backed nodes carry OS, implementation and bridge in the rendered config
    pub fn is_sdn(&self) -> bool {
        self.operating_system == OperatingSystem::Ovs
    }
}

/// One cluster's copy of the node template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFragment {
    /// Anchor/gateway address of the cluster's hosting machine
    pub cluster_ip: IpAddr,
    /// First address available for allocation, set by the allocator
    pub start_ip: Option<IpAddr>,
    /// Number of address-consuming nodes
    pub host_count: usize,
    pub nodes: Vec<Node>,
}

impl ClusterFragment {
    pub fn from_template(cluster_ip: IpAddr, template: &[Node]) -> Self {
        let nodes = template.to_vec();
        let host_count = count_hosts(&nodes);
        Self {
            cluster_ip,
            start_ip: None,
            host_count,
            nodes,
        }
    }

    pub fn refresh_host_count(&mut self) -> usize {
        self.host_count = count_hosts(&self.nodes);
        self.host_count
    }

    pub fn find(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.label == label)
    }
}

fn count_hosts(nodes: &[Node]) -> usize {
    nodes.iter().filter(|node| node.kind() == NodeKind::Host).count()
}

/// Replicate the shared node template into one fragment per declared cluster
pub fn build_fragments(cluster_ips: &[IpAddr], template: &[Node]) -> Vec<ClusterFragment> {
    let fragments: Vec<ClusterFragment> = cluster_ips
        .iter()
        .map(|cluster_ip| ClusterFragment::from_template(*cluster_ip, template))
        .collect();
    for (index, fragment) in fragments.iter().enumerate() {
        log::debug!(
            "cluster {} ({}): {} nodes, {} mininet hosts",
            index,
            fragment.cluster_ip,
            fragment.nodes.len(),
            fragment.host_count
        );
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_node_kind_classification() {
        let host = Node::new("a", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Linux);
        let mac = Node::new("b", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Darwin);
        let switch = Node::new("c", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Ovs);
        let physical = Node::new("d", ip("10.0.0.1"), Platform::Physical, OperatingSystem::Ovs);
        let plain = Node::new("e", ip("10.0.0.1"), Platform::Physical, OperatingSystem::Linux);

        assert_eq!(host.kind(), NodeKind::Host);
        assert_eq!(mac.kind(), NodeKind::Host);
        assert_eq!(switch.kind(), NodeKind::Switch);
        assert_eq!(physical.kind(), NodeKind::SdnPhysical);
        assert_eq!(plain.kind(), NodeKind::Other);
    }

    #[test]
    fn test_sdn_defaults() {
        let switch = Node::new("c", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Ovs);
        assert_eq!(switch.sdn_implementation.as_deref(), Some("ports"));
        assert_eq!(switch.bridge.as_deref(), Some("br"));

        let host = Node::new("a", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Linux);
        assert!(host.sdn_implementation.is_none());
        assert!(host.bridge.is_none());
        assert_eq!(host.name, "nap");
        assert_eq!(host.running_mode, "user");
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!(Platform::from("mininet"), Platform::Mininet);
        assert_eq!(Platform::from("ovs"), Platform::SoftwareSwitch);
        assert_eq!(Platform::from(""), Platform::Physical);
        assert_eq!(Platform::from("server"), Platform::Physical);
    }

    #[test]
    fn test_with_connection_stamps_owner() {
        let node = Node::new("00000001", ip("10.0.0.1"), Platform::Physical, OperatingSystem::Ovs)
            .with_connection(Connection::new("00000002", Endpoint::Port(3), Endpoint::Interface("eth0".into())));
        assert_eq!(node.connections[0].from_node, "00000001");
        assert_eq!(node.base_src_port, Some(3));
    }

    #[test]
    fn test_build_fragments_counts_hosts() {
        let template = vec![
            Node::new("a", ip("10.0.0.1"), Platform::Mininet, OperatingSystem::Linux),
            Node::new("b", ip("10.0.0.3"), Platform::Mininet, OperatingSystem::Linux),
            Node::new("s", ip("192.168.1.10"), Platform::Mininet, OperatingSystem::Ovs),
        ];
        let fragments = build_fragments(&[ip("192.168.1.10"), ip("192.168.1.20")], &template);
        assert_eq!(fragments.len(), 2);
        assert!(fragments.iter().all(|f| f.host_count == 2 && f.nodes.len() == 3));
        assert_eq!(fragments[1].cluster_ip, ip("192.168.1.20"));
        assert!(fragments[0].start_ip.is_none());
    }
}
