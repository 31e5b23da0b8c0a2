//! Configuration structures.
//!
//! Two input files drive the tool: the topology configuration that
//! describes the clusters and the shared node template, and the NAP
//! deployment configuration that drives the per-node file generator. Both
//! are read into raw serde structures first and then resolved once into
//! typed settings, so required keys are checked up front and optional keys
//! get their documented defaults with a log record.

use crate::topology::types::{
    Connection, Endpoint, Node, OperatingSystem, Platform, DEFAULT_BRIDGE, DEFAULT_NODE_NAME,
    DEFAULT_RUNNING_MODE, DEFAULT_SDN_IMPLEMENTATION,
};
use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field '{field}' in {context}")]
    MissingRequiredField { field: &'static str, context: String },

    #[error("conflicting fields in {context}: {message}")]
    ConflictingFields { context: String, message: String },

    #[error("invalid address '{value}' for '{field}': {reason}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

fn missing(field: &'static str, context: impl Into<String>) -> ValidationError {
    ValidationError::MissingRequiredField {
        field,
        context: context.into(),
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<IpAddr, ValidationError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_network(field: &'static str, value: &str) -> Result<IpNetwork, ValidationError> {
    value
        .trim()
        .parse()
        .map_err(|e: ipnetwork::IpNetworkError| ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Join `relative` under `root` the way the deployment paths are written
/// (`ROOT_DIR` + `WRITE_TOPO`), with or without separating slashes.
pub fn under_root(root: &Path, relative: &str) -> PathBuf {
    root.join(relative.trim_start_matches('/'))
}

/// Accepts a port written as a JSON number or as a numeric string
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match Option::<PortRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortRepr::Number(port)) => Ok(Some(port)),
        Some(PortRepr::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

// ============================================================================
// Topology configuration
// ============================================================================

/// Connection entry of the node template
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSpec {
    #[serde(rename = "to")]
    pub to_node: Option<String>,
    pub src_if: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub src_pt: Option<u16>,
    pub dst_if: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub dst_pt: Option<u16>,
    pub name: Option<String>,
    pub bridge: Option<String>,
}

impl ConnectionSpec {
    fn endpoint(
        interface: Option<String>,
        port: Option<u16>,
        side: &str,
        context: &str,
    ) -> Result<Endpoint, ValidationError> {
        match (interface, port) {
            (Some(interface), None) => Ok(Endpoint::Interface(interface)),
            (None, Some(port)) => Ok(Endpoint::Port(port)),
            (Some(_), Some(_)) => Err(ValidationError::ConflictingFields {
                context: context.to_string(),
                message: format!("both {side}_if and {side}_pt are set"),
            }),
            (None, None) => Err(ValidationError::MissingRequiredField {
                field: if side == "src" { "src_if|src_pt" } else { "dst_if|dst_pt" },
                context: context.to_string(),
            }),
        }
    }

    /// Build the connection owned by `owner`
    pub fn into_connection(self, owner: &str) -> Result<Connection, ValidationError> {
        let context = format!(
            "connection {} -> {}",
            owner,
            self.to_node.as_deref().unwrap_or("?")
        );
        let source = Self::endpoint(self.src_if, self.src_pt, "src", &context)?;
        let destination = Self::endpoint(self.dst_if, self.dst_pt, "dst", &context)?;
        let name = self.name.unwrap_or_else(|| {
            debug!("{}: no name, default to {}", context, DEFAULT_NODE_NAME);
            DEFAULT_NODE_NAME.to_string()
        });
        let bridge = self.bridge.unwrap_or_else(|| {
            debug!("{}: no bridge, default to {}", context, DEFAULT_BRIDGE);
            DEFAULT_BRIDGE.to_string()
        });
        if self.to_node.is_none() {
            warn!("{}: connection without a peer label", context);
        }
        Ok(Connection {
            from_node: owner.to_string(),
            to_node: self.to_node,
            source,
            destination,
            name,
            bridge,
        })
    }
}

/// Node entry of the shared node template
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub label: Option<String>,
    pub testbed_ip: Option<String>,
    pub platform: Option<String>,
    pub operating_system: Option<String>,
    pub running_mode: Option<String>,
    #[serde(default)]
    pub role: Vec<String>,
    pub name: Option<String>,
    pub sdn_implementation: Option<String>,
    pub bridge: Option<String>,
    #[serde(default)]
    pub promisc: bool,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

impl TryFrom<NodeSpec> for Node {
    type Error = ValidationError;

    fn try_from(spec: NodeSpec) -> Result<Self, Self::Error> {
        let label = spec.label.ok_or_else(|| missing("label", "cluster_topology node"))?;
        let context = format!("node {}", label);
        let testbed_ip = spec
            .testbed_ip
            .ok_or_else(|| missing("testbed_ip", context.clone()))?;
        let testbed_ip = parse_address("testbed_ip", &testbed_ip)?;

        let platform = match spec.platform.as_deref() {
            Some(platform) => Platform::from(platform),
            None => {
                info!("{}: no platform, default to physical", context);
                Platform::Physical
            }
        };
        let operating_system = match spec.operating_system.as_deref() {
            Some(os) => OperatingSystem::from(os),
            None => {
                info!("{}: default operating system is Linux", context);
                OperatingSystem::Linux
            }
        };
        let sdn = operating_system == OperatingSystem::Ovs;
        let sdn_implementation = spec.sdn_implementation.or_else(|| {
            sdn.then(|| {
                info!("{}: default sdn_implementation is {}", context, DEFAULT_SDN_IMPLEMENTATION);
                DEFAULT_SDN_IMPLEMENTATION.to_string()
            })
        });
        let bridge = spec.bridge.or_else(|| {
            sdn.then(|| {
                info!("{}: default bridge name is {}", context, DEFAULT_BRIDGE);
                DEFAULT_BRIDGE.to_string()
            })
        });

        let mut node = Node::new(label, testbed_ip, platform, operating_system);
        node.running_mode = spec
            .running_mode
            .unwrap_or_else(|| DEFAULT_RUNNING_MODE.to_string());
        node.role = spec.role;
        node.name = spec.name.unwrap_or_else(|| {
            debug!("{}: no name, default to {}", context, DEFAULT_NODE_NAME);
            DEFAULT_NODE_NAME.to_string()
        });
        node.sdn_implementation = sdn_implementation;
        node.bridge = bridge;
        node.promisc = spec.promisc;

        if spec.connections.is_empty() {
            warn!("{}: node without connections", context);
        }
        for connection in spec.connections {
            let connection = connection.into_connection(&node.label)?;
            node = node.with_connection(connection);
        }
        Ok(node)
    }
}

/// Cluster entry: the address of the machine hosting the cluster
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSpec {
    pub cluster_ip: Option<String>,
}

impl ClusterSpec {
    fn address(&self, index: usize) -> Result<IpAddr, ValidationError> {
        let value = self
            .cluster_ip
            .as_deref()
            .ok_or_else(|| missing("cluster_ip", format!("cluster {}", index)))?;
        parse_address("cluster_ip", value)
    }
}

/// Raw topology configuration as read from disk
#[derive(Debug, Deserialize)]
pub struct TopologyConfig {
    #[serde(rename = "ROOT_DIR")]
    pub root_dir: Option<String>,
    #[serde(rename = "WRITE_TOPO")]
    pub write_topo: Option<String>,
    #[serde(rename = "MANAGEMENT_NET")]
    pub management_net: Option<String>,
    /// Global engine parameters, rendered in file order
    #[serde(rename = "CLICK_GLOBAL_CONF")]
    pub click_global_conf: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub cluster_topology: Vec<NodeSpec>,
}

/// Validated topology settings
#[derive(Debug, Clone)]
pub struct TopologySettings {
    pub root_dir: PathBuf,
    pub write_topo: String,
    pub management_net: IpNetwork,
    pub global_params: serde_json::Map<String, serde_json::Value>,
    pub cluster_ips: Vec<IpAddr>,
    pub template: Vec<Node>,
}

impl TopologySettings {
    /// Directory that receives `mn_icn.cfg`
    pub fn output_dir(&self) -> PathBuf {
        under_root(&self.root_dir, &self.write_topo)
    }
}

impl TopologyConfig {
    /// Check required keys and build the typed settings
    pub fn resolve(self) -> Result<TopologySettings, ValidationError> {
        const CONTEXT: &str = "topology configuration";
        let root_dir = self.root_dir.ok_or_else(|| missing("ROOT_DIR", CONTEXT))?;
        let write_topo = self.write_topo.ok_or_else(|| missing("WRITE_TOPO", CONTEXT))?;
        let management_net = self
            .management_net
            .ok_or_else(|| missing("MANAGEMENT_NET", CONTEXT))?;
        let management_net = parse_network("MANAGEMENT_NET", &management_net)?;
        let global_params = self.click_global_conf.unwrap_or_else(|| {
            warn!("no CLICK_GLOBAL_CONF given, the configuration will carry no global parameters");
            serde_json::Map::new()
        });

        if self.clusters.is_empty() {
            return Err(missing("clusters", CONTEXT));
        }
        if self.cluster_topology.is_empty() {
            return Err(missing("cluster_topology", CONTEXT));
        }

        let cluster_ips = self
            .clusters
            .iter()
            .enumerate()
            .map(|(index, cluster)| cluster.address(index))
            .collect::<Result<Vec<_>, _>>()?;
        let template = self
            .cluster_topology
            .into_iter()
            .map(Node::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TopologySettings {
            root_dir: PathBuf::from(root_dir),
            write_topo,
            management_net,
            global_params,
            cluster_ips,
            template,
        })
    }
}

// ============================================================================
// NAP deployment configuration
// ============================================================================

/// Remote sub-directories (under `ROOT_DIR`) for generated files
#[derive(Debug, Clone, Deserialize)]
pub struct WriteConfig {
    pub nap: String,
    pub httpproxy: String,
}

/// NAP interface and routing prefix settings
#[derive(Debug, Clone, Deserialize)]
pub struct NapInterfaceConfig {
    #[serde(rename = "if")]
    pub interface: Option<String>,
    #[serde(rename = "routingPrefixes", default)]
    pub routing_prefixes: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Local directories for the per-cluster address lists
#[derive(Debug, Clone, Deserialize)]
pub struct IpListPaths {
    pub naps: String,
    pub end_points: String,
}

fn default_attempts() -> u32 {
    6
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_workers() -> usize {
    4
}

fn default_ssh_port() -> u16 {
    22
}

/// Remote delivery tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    /// Connection attempts per host (first try plus retries)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Connect and I/O timeout per host, e.g. "30s"
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Clusters served concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout: default_timeout(),
            workers: default_workers(),
            port: default_ssh_port(),
        }
    }
}

/// Raw NAP deployment configuration as read from disk
#[derive(Debug, Deserialize)]
pub struct NapDeploymentConfig {
    #[serde(rename = "USER")]
    pub user: Option<String>,
    #[serde(rename = "ROOT_DIR")]
    pub root_dir: Option<String>,
    #[serde(rename = "WRITE_CONFIG", alias = "WIRTE_CONFIG")]
    pub write_config: Option<WriteConfig>,
    #[serde(rename = "MANAGEMENT_NET")]
    pub management_net: Option<String>,
    #[serde(rename = "DATA_NET")]
    pub data_net: Option<String>,
    #[serde(rename = "NUMBER_NAPS")]
    pub number_naps: Option<u32>,
    pub napconf: Option<NapInterfaceConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(rename = "IP_LISTS")]
    pub ip_lists: Option<IpListPaths>,
    #[serde(rename = "PASSWORD")]
    pub password: Option<String>,
    #[serde(rename = "DELIVERY", default)]
    pub delivery: DeliverySettings,
}

/// Validated NAP deployment settings
#[derive(Debug, Clone)]
pub struct NapDeployment {
    pub user: String,
    pub root_dir: PathBuf,
    pub write_config: WriteConfig,
    pub management_net: IpNetwork,
    pub data_net: IpNetwork,
    pub number_naps: u32,
    pub interface: String,
    pub routing_prefixes: Vec<serde_json::Map<String, serde_json::Value>>,
    pub cluster_ips: Vec<IpAddr>,
    pub ip_lists: Option<IpListPaths>,
    pub password: Option<String>,
    pub delivery: DeliverySettings,
}

impl NapDeployment {
    /// Remote directory for NAP configuration files
    pub fn remote_nap_dir(&self) -> PathBuf {
        under_root(&self.root_dir, &self.write_config.nap)
    }

    /// Remote directory for HTTP proxy configuration files
    pub fn remote_httpproxy_dir(&self) -> PathBuf {
        under_root(&self.root_dir, &self.write_config.httpproxy)
    }

    /// Private key tried before password authentication
    pub fn private_key(&self) -> PathBuf {
        self.root_dir.join(".ssh").join("id_rsa")
    }
}

/// NAPs per cluster when `NUMBER_NAPS` is absent
pub const DEFAULT_NUMBER_NAPS: u32 = 2;

impl NapDeploymentConfig {
    /// Check required keys and build the typed settings
    pub fn resolve(self) -> Result<NapDeployment, ValidationError> {
        const CONTEXT: &str = "NAP deployment configuration";
        let user = self.user.ok_or_else(|| missing("USER", CONTEXT))?;
        let root_dir = self.root_dir.unwrap_or_else(|| {
            let fallback = format!("/home/{}", user);
            warn!("no ROOT_DIR given, default to {}", fallback);
            fallback
        });
        let write_config = self
            .write_config
            .ok_or_else(|| missing("WRITE_CONFIG", CONTEXT))?;
        let management_net = self
            .management_net
            .ok_or_else(|| missing("MANAGEMENT_NET", CONTEXT))?;
        let management_net = parse_network("MANAGEMENT_NET", &management_net)?;
        let data_net = self.data_net.ok_or_else(|| missing("DATA_NET", CONTEXT))?;
        let data_net = parse_network("DATA_NET", &data_net)?;
        let number_naps = self.number_naps.unwrap_or_else(|| {
            warn!("no NUMBER_NAPS given, default to {}", DEFAULT_NUMBER_NAPS);
            DEFAULT_NUMBER_NAPS
        });
        let napconf = self.napconf.ok_or_else(|| missing("napconf", CONTEXT))?;
        let interface = napconf
            .interface
            .ok_or_else(|| missing("if", "napconf"))?;
        if napconf.routing_prefixes.is_empty() {
            warn!("no routingPrefixes given, NAPs will not route any prefix");
        }
        if self.clusters.is_empty() {
            return Err(missing("clusters", CONTEXT));
        }
        let cluster_ips = self
            .clusters
            .iter()
            .enumerate()
            .map(|(index, cluster)| cluster.address(index))
            .collect::<Result<Vec<_>, _>>()?;
        if self.delivery.workers == 0 {
            return Err(ValidationError::InvalidValue {
                field: "DELIVERY.workers",
                message: "at least one worker is required".to_string(),
            });
        }
        if self.delivery.attempts == 0 {
            return Err(ValidationError::InvalidValue {
                field: "DELIVERY.attempts",
                message: "at least one attempt is required".to_string(),
            });
        }

        Ok(NapDeployment {
            user,
            root_dir: PathBuf::from(root_dir),
            write_config,
            management_net,
            data_net,
            number_naps,
            interface,
            routing_prefixes: napconf.routing_prefixes,
            cluster_ips,
            ip_lists: self.ip_lists,
            password: self.password,
            delivery: self.delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"{
        "ROOT_DIR": "/home/icn/",
        "WRITE_TOPO": "blackadder/deployment",
        "MANAGEMENT_NET": "10.0.0.1/24",
        "CLICK_GLOBAL_CONF": {"BLACKADDER_ID_LENGTH": 8, "LIPSIN_ID_LENGTH": 32, "CLICK_HOME": "/usr/local/"},
        "clusters": [{"cluster_ip": "192.168.1.10"}, {"cluster_ip": "192.168.1.20"}],
        "cluster_topology": [
            {"label": "00000001", "testbed_ip": "10.0.0.1", "platform": "mininet",
             "role": ["RV", "TM"],
             "connections": [{"to": "00000100", "src_if": "nap1-eth1", "dst_pt": "3"}]},
            {"label": "00000100", "testbed_ip": "10.0.1.100", "operating_system": "ovs",
             "connections": [{"to": "00000001", "src_pt": 3, "dst_if": "nap1-eth1", "bridge": "br-icn"}]}
        ]
    }"#;

    #[test]
    fn test_topology_config_parsing() {
        let config: TopologyConfig = serde_json::from_str(TOPOLOGY).unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.output_dir(), PathBuf::from("/home/icn/blackadder/deployment"));
        assert_eq!(settings.management_net.to_string(), "10.0.0.1/24");
        assert_eq!(settings.cluster_ips.len(), 2);
        let keys: Vec<_> = settings.global_params.keys().cloned().collect();
        assert_eq!(keys, vec!["BLACKADDER_ID_LENGTH", "LIPSIN_ID_LENGTH", "CLICK_HOME"]);

        let host = &settings.template[0];
        assert_eq!(host.platform, Platform::Mininet);
        assert_eq!(host.operating_system, OperatingSystem::Linux);
        assert_eq!(host.role, vec!["RV", "TM"]);
        assert_eq!(host.connections[0].from_node, "00000001");
        assert_eq!(host.connections[0].destination, Endpoint::Port(3));
        assert_eq!(host.connections[0].bridge, "br");
        assert_eq!(host.connections[0].name, "nap");

        let physical = &settings.template[1];
        assert_eq!(physical.platform, Platform::Physical);
        assert_eq!(physical.sdn_implementation.as_deref(), Some("ports"));
        assert_eq!(physical.bridge.as_deref(), Some("br"));
        assert_eq!(physical.base_src_port, Some(3));
        assert_eq!(physical.connections[0].bridge, "br-icn");
    }

    #[test]
    fn test_missing_required_fields() {
        let config: TopologyConfig = serde_json::from_str(r#"{"ROOT_DIR": "/tmp/"}"#).unwrap();
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequiredField { field: "WRITE_TOPO", .. }));

        let node: NodeSpec = serde_json::from_str(r#"{"label": "00000001"}"#).unwrap();
        let err = Node::try_from(node).unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequiredField { field: "testbed_ip", .. }));
    }

    #[test]
    fn test_connection_endpoint_rules() {
        let both: ConnectionSpec =
            serde_json::from_str(r#"{"to": "b", "src_if": "eth0", "src_pt": 3, "dst_if": "eth1"}"#).unwrap();
        assert!(matches!(
            both.into_connection("a"),
            Err(ValidationError::ConflictingFields { .. })
        ));

        let neither: ConnectionSpec = serde_json::from_str(r#"{"to": "b", "src_if": "eth0"}"#).unwrap();
        assert!(matches!(
            neither.into_connection("a"),
            Err(ValidationError::MissingRequiredField { field: "dst_if|dst_pt", .. })
        ));

        let bad_port = serde_json::from_str::<ConnectionSpec>(r#"{"to": "b", "src_pt": "x1"}"#);
        assert!(bad_port.is_err());
    }

    #[test]
    fn test_invalid_management_net() {
        let json = TOPOLOGY.replace("10.0.0.1/24", "10.0.0.1/40");
        let config: TopologyConfig = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            config.resolve(),
            Err(ValidationError::InvalidAddress { field: "MANAGEMENT_NET", .. })
        ));
    }

    #[test]
    fn test_nap_deployment_defaults() {
        let json = r#"{
            "USER": "icn",
            "WIRTE_CONFIG": {"nap": "napConfig", "httpproxy": "proxyConfig"},
            "MANAGEMENT_NET": "10.0.0.1/24",
            "DATA_NET": "10.1.0.1/24",
            "napconf": {"if": "eth1", "routingPrefixes": [{"networkAddress": "10.1.0.0", "netmask": "255.255.255.0"}]},
            "clusters": [{"cluster_ip": "192.168.1.10"}]
        }"#;
        let config: NapDeploymentConfig = serde_json::from_str(json).unwrap();
        let deployment = config.resolve().unwrap();

        assert_eq!(deployment.root_dir, PathBuf::from("/home/icn"));
        assert_eq!(deployment.number_naps, DEFAULT_NUMBER_NAPS);
        assert_eq!(deployment.remote_nap_dir(), PathBuf::from("/home/icn/napConfig"));
        assert_eq!(deployment.private_key(), PathBuf::from("/home/icn/.ssh/id_rsa"));
        assert_eq!(deployment.delivery.attempts, 6);
        assert_eq!(deployment.delivery.timeout, Duration::from_secs(30));
        assert_eq!(deployment.delivery.port, 22);
    }

    #[test]
    fn test_delivery_settings_parsing() {
        let settings: DeliverySettings =
            serde_json::from_str(r#"{"attempts": 3, "timeout": "1m 30s", "workers": 8}"#).unwrap();
        assert_eq!(settings.attempts, 3);
        assert_eq!(settings.timeout, Duration::from_secs(90));
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.port, 22);
    }

    #[test]
    fn test_under_root() {
        assert_eq!(under_root(Path::new("/home/icn/"), "topo"), PathBuf::from("/home/icn/topo"));
        assert_eq!(under_root(Path::new("/home/icn"), "/topo"), PathBuf::from("/home/icn/topo"));
    }
}
