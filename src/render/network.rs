//! Serializer for `mn_icn.cfg`.
//!
//! Global parameters come first in configuration order, followed by one
//! `network` block listing every node of the merged topology with its
//! connections.

use super::{quote, value_text, RenderError};
use crate::config::TopologySettings;
use crate::topology::merge::MergedTopology;
use crate::topology::types::{Connection, Endpoint, Node};
use log::{debug, info};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name of the network configuration read by the forwarding engine
pub const NETWORK_CONFIG_FILE: &str = "mn_icn.cfg";

const NODE_INDENT: &str = "\t\t";
const NODE_FIELD_INDENT: &str = "\t\t\t";
const CONNECTION_INDENT: &str = "\t\t\t\t";
const CONNECTION_FIELD_INDENT: &str = "\t\t\t\t\t";

/// Renders a merged topology into `mn_icn.cfg`
#[derive(Debug, Clone)]
pub struct ConfigSerializer {
    output_dir: PathBuf,
    global_params: Map<String, Value>,
}

impl ConfigSerializer {
    pub fn new(output_dir: impl Into<PathBuf>, global_params: Map<String, Value>) -> Self {
        Self {
            output_dir: output_dir.into(),
            global_params,
        }
    }

    pub fn from_settings(settings: &TopologySettings) -> Self {
        Self::new(settings.output_dir(), settings.global_params.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render the whole configuration, global parameters first
    pub fn render(&self, topology: &MergedTopology) -> String {
        let mut out = String::new();
        for (key, value) in &self.global_params {
            out.push_str(&format!("{} = {};\n", key, render_global(value)));
        }

        out.push_str("network = {\n");
        let nodes: Vec<&Node> = topology.nodes().collect();
        if nodes.is_empty() {
            out.push_str("\tnodes = ( );\n");
        } else {
            out.push_str("\tnodes = (\n");
            for (index, node) in nodes.iter().enumerate() {
                render_node(&mut out, node);
                out.push_str(NODE_INDENT);
                out.push_str(if index + 1 < nodes.len() { "},\n" } else { "}\n" });
            }
            out.push_str("\t);\n");
        }
        out.push_str("};\n");
        out
    }

    /// Write `mn_icn.cfg` into the output directory, creating it if needed
    pub fn write_network_config(&self, topology: &MergedTopology) -> Result<PathBuf, RenderError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| RenderError::io(&self.output_dir, e))?;
        let path = self.output_dir.join(NETWORK_CONFIG_FILE);
        let content = self.render(topology);
        std::fs::write(&path, &content).map_err(|e| RenderError::io(&path, e))?;
        info!(
            "Wrote network configuration with {} nodes to {:?}",
            topology.node_count(),
            path
        );
        Ok(path)
    }
}

fn render_global(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => quote(&value_text(other)),
    }
}

fn field(out: &mut String, indent: &str, key: &str, value: &str) {
    out.push_str(&format!("{}{} = {};\n", indent, key, value));
}

fn render_node(out: &mut String, node: &Node) {
    debug!("rendering node {} ({})", node.label, node.testbed_ip);
    out.push_str(NODE_INDENT);
    out.push_str("{\n");

    let roles: Vec<String> = node.role.iter().map(|role| quote(role)).collect();
    field(out, NODE_FIELD_INDENT, "testbed_ip", &quote(&node.testbed_ip.to_string()));
    field(out, NODE_FIELD_INDENT, "label", &quote(&node.label));
    field(out, NODE_FIELD_INDENT, "running_mode", &quote(&node.running_mode));
    field(out, NODE_FIELD_INDENT, "role", &format!("[{}]", roles.join(", ")));
    field(out, NODE_FIELD_INDENT, "name", &quote(&node.name));
    field(out, NODE_FIELD_INDENT, "promisc", &node.promisc.to_string());

    if node.is_sdn() {
        field(out, NODE_FIELD_INDENT, "operating_system", &quote(&node.operating_system.to_string()));
        if let Some(implementation) = &node.sdn_implementation {
            field(out, NODE_FIELD_INDENT, "sdn_implementation", &quote(implementation));
        }
        if let Some(bridge) = &node.bridge {
            field(out, NODE_FIELD_INDENT, "bridge", &quote(bridge));
        }
    }

    if node.connections.is_empty() {
        out.push_str(NODE_FIELD_INDENT);
        out.push_str("connections = ( );\n");
        return;
    }

    out.push_str(NODE_FIELD_INDENT);
    out.push_str("connections = (\n");
    for (index, connection) in node.connections.iter().enumerate() {
        render_connection(out, connection);
        out.push_str(CONNECTION_INDENT);
        out.push_str(if index + 1 < node.connections.len() { "},\n" } else { "}\n" });
    }
    out.push_str(NODE_FIELD_INDENT);
    out.push_str(");\n");
}

fn render_connection(out: &mut String, connection: &Connection) {
    out.push_str(CONNECTION_INDENT);
    out.push_str("{\n");
    if let Some(to) = &connection.to_node {
        field(out, CONNECTION_FIELD_INDENT, "to", &quote(to));
    }
    field(out, CONNECTION_FIELD_INDENT, "bridge", &quote(&connection.bridge));
    render_endpoint(out, "src", &connection.source);
    render_endpoint(out, "dst", &connection.destination);
}

fn render_endpoint(out: &mut String, side: &str, endpoint: &Endpoint) {
    match endpoint {
        Endpoint::Interface(interface) => {
            field(out, CONNECTION_FIELD_INDENT, &format!("{}_if", side), &quote(interface))
        }
        Endpoint::Port(port) => {
            field(out, CONNECTION_FIELD_INDENT, &format!("{}_pt", side), &quote(&port.to_string()))
        }
    }
}
