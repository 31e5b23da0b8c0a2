//! NAP-side configuration files.
//!
//! Every cluster hosts `NUMBER_NAPS` network attachment points. Their
//! management and data addresses are walked from the start of the two
//! configured networks, two addresses per NAP, continuing across clusters
//! in cluster order.

use super::{quote, value_text, RenderError};
use crate::config::{under_root, NapDeployment};
use crate::ip::allocator::ADDRESS_UNITS_PER_HOST;
use crate::ip::label::{advance, host_label_words, label_from_address, switch_label_words, DEFAULT_LABEL_LEN};
use crate::ip::PlanError;
use ipnetwork::IpNetwork;
use log::{debug, info};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// One planned NAP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NapEntry {
    pub cluster_index: usize,
    pub cluster_ip: IpAddr,
    /// 1-based position of the NAP inside its cluster
    pub index: u32,
    pub label: String,
    pub management_ip: IpAddr,
    pub data_ip: IpAddr,
    /// Interface name, `nap<index>-<if>`
    pub interface: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Nap,
    HttpProxy,
}

/// A file written to the staging directory, to be shipped to `cluster_ip`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub cluster_index: usize,
    pub cluster_ip: IpAddr,
    pub kind: ConfigKind,
    pub path: PathBuf,
}

/// `address` if it still lies inside `block`
fn within(address: IpAddr, block: IpNetwork) -> Result<IpAddr, PlanError> {
    if block.contains(address) {
        Ok(address)
    } else {
        Err(PlanError::AddressSpaceExhausted { address, block })
    }
}

/// Step `address` forward, reporting an overflow as exhaustion of `block`
fn step(address: IpAddr, units: u64, block: IpNetwork) -> Result<IpAddr, PlanError> {
    advance(address, units).map_err(|_| PlanError::AddressSpaceExhausted { address, block })
}

/// Walk the NAP addresses of every cluster
pub fn plan_naps(deployment: &NapDeployment) -> Result<Vec<NapEntry>, PlanError> {
    let mut management_ip = deployment.management_net.ip();
    let mut data_ip = deployment.data_net.ip();
    let mut entries = Vec::new();

    for (cluster_index, cluster_ip) in deployment.cluster_ips.iter().enumerate() {
        for index in 1..=deployment.number_naps {
            within(management_ip, deployment.management_net)?;
            within(data_ip, deployment.data_net)?;
            let label = label_from_address(management_ip, host_label_words(&management_ip), DEFAULT_LABEL_LEN)?;
            entries.push(NapEntry {
                cluster_index,
                cluster_ip: *cluster_ip,
                index,
                label,
                management_ip,
                data_ip,
                interface: format!("nap{}-{}", index, deployment.interface),
            });
            management_ip = step(management_ip, ADDRESS_UNITS_PER_HOST, deployment.management_net)?;
            data_ip = step(data_ip, ADDRESS_UNITS_PER_HOST, deployment.data_net)?;
        }
    }
    debug!("planned {} NAPs", entries.len());
    Ok(entries)
}

/// Render `nap-<label>.cfg`
pub fn render_nap_config(entry: &NapEntry, routing_prefixes: &[Map<String, Value>]) -> String {
    let mut out = String::from("napConfig:\n{\n");
    out.push_str(&format!("\tnodeId = {};\n", quote(&entry.label)));
    out.push_str(&format!("\tinterface = {};\n", quote(&entry.interface)));
    out.push_str(&format!("\tnetworkAddress = {};\n", quote(&entry.data_ip.to_string())));
    out.push_str("\tnetmask = \"255.255.255.255\";\n");

    if routing_prefixes.is_empty() {
        out.push_str("\troutingPrefixes = ( );\n");
    } else {
        out.push_str("\troutingPrefixes = (\n");
        for (index, prefix) in routing_prefixes.iter().enumerate() {
            out.push_str("\t\t{\n");
            for (key, value) in prefix {
                out.push_str(&format!("\t\t\t{} = {};\n", key, quote(&value_text(value))));
            }
            out.push_str(if index + 1 < routing_prefixes.len() { "\t\t},\n" } else { "\t\t}\n" });
        }
        out.push_str("\t);\n");
    }

    out.push_str("\tfqdns = ();\n};\n");
    out
}

/// Render `httpproxy-<label>.cfg`
pub fn render_httpproxy_config(entry: &NapEntry) -> String {
    format!("proxyConfig:\n{{\n\tinterface = {};\n}};\n", quote(&entry.interface))
}

fn write_file(dir: &Path, name: &str, content: &str) -> Result<PathBuf, RenderError> {
    std::fs::create_dir_all(dir).map_err(|e| RenderError::io(dir, e))?;
    let path = dir.join(name);
    std::fs::write(&path, content).map_err(|e| RenderError::io(&path, e))?;
    Ok(path)
}

fn write_configs<F>(
    deployment: &NapDeployment,
    staging_dir: &Path,
    kind: ConfigKind,
    render: F,
) -> Result<Vec<GeneratedFile>, RenderError>
where
    F: Fn(&NapEntry) -> (String, String),
{
    let mut files = Vec::new();
    for entry in plan_naps(deployment)? {
        let (name, content) = render(&entry);
        let path = write_file(staging_dir, &name, &content)?;
        debug!("cluster {}: wrote {:?}", entry.cluster_ip, path);
        files.push(GeneratedFile {
            cluster_index: entry.cluster_index,
            cluster_ip: entry.cluster_ip,
            kind,
            path,
        });
    }
    Ok(files)
}

/// Write one `nap-<label>.cfg` per NAP into `staging_dir`
pub fn write_nap_configs(
    deployment: &NapDeployment,
    staging_dir: &Path,
) -> Result<Vec<GeneratedFile>, RenderError> {
    let files = write_configs(deployment, staging_dir, ConfigKind::Nap, |entry| {
        (
            format!("nap-{}.cfg", entry.label),
            render_nap_config(entry, &deployment.routing_prefixes),
        )
    })?;
    info!("Wrote {} NAP configuration files to {:?}", files.len(), staging_dir);
    Ok(files)
}

/// Write one `httpproxy-<label>.cfg` per NAP into `staging_dir`
pub fn write_httpproxy_configs(
    deployment: &NapDeployment,
    staging_dir: &Path,
) -> Result<Vec<GeneratedFile>, RenderError> {
    let files = write_configs(deployment, staging_dir, ConfigKind::HttpProxy, |entry| {
        (
            format!("httpproxy-{}.cfg", entry.label),
            render_httpproxy_config(entry),
        )
    })?;
    info!("Wrote {} HTTP proxy configuration files to {:?}", files.len(), staging_dir);
    Ok(files)
}

/// Write the per-cluster `endpoint-<label>` and `nap-<label>` address lists.
///
/// Each cluster lists `NUMBER_NAPS` endpoint/NAP pairs; the management
/// cursor alternates between the two files one address at a time. Does
/// nothing when `IP_LISTS` is not configured.
pub fn write_address_lists(deployment: &NapDeployment) -> Result<Vec<PathBuf>, RenderError> {
    let Some(lists) = &deployment.ip_lists else {
        debug!("no IP_LISTS configured, skipping address lists");
        return Ok(Vec::new());
    };
    let nap_dir = under_root(&deployment.root_dir, &lists.naps);
    let endpoint_dir = under_root(&deployment.root_dir, &lists.end_points);

    let block = deployment.management_net;
    let mut management_ip = block.ip();
    let mut written = Vec::new();
    for cluster_ip in &deployment.cluster_ips {
        let label = label_from_address(*cluster_ip, switch_label_words(cluster_ip), DEFAULT_LABEL_LEN)?;
        let mut endpoints = String::new();
        let mut naps = String::new();
        for _ in 0..deployment.number_naps {
            endpoints.push_str(&format!("{}\n", within(management_ip, block)?));
            management_ip = step(management_ip, 1, block)?;
            naps.push_str(&format!("{}\n", within(management_ip, block)?));
            management_ip = step(management_ip, 1, block)?;
        }
        written.push(write_file(&endpoint_dir, &format!("endpoint-{}", label), &endpoints)?);
        written.push(write_file(&nap_dir, &format!("nap-{}", label), &naps)?);
    }
    info!("Wrote address lists for {} clusters", deployment.cluster_ips.len());
    Ok(written)
}
