//! Configuration orchestrator.
//!
//! This module coordinates the overall generation process: the topology
//! pipeline from the node template to `mn_icn.cfg`, and the NAP pipeline from
//! the deployment configuration to files shipped onto every cluster host.

use crate::config::{NapDeployment, TopologySettings};
use crate::delivery::{deliver_all, ClusterDeliveryReport, DeliveryJob, RemoteDelivery};
use crate::ip::{AllocationSummary, ClusterAllocator};
use crate::render::{
    write_address_lists, write_httpproxy_configs, write_nap_configs, ConfigKind,
    ConfigSerializer, GeneratedFile,
};
use crate::topology::{build_fragments, validate_topology, MergedTopology, ValidationReport};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// What a topology run produced
#[derive(Debug, Clone)]
pub struct NetworkSummary {
    pub allocation: AllocationSummary,
    pub validation: ValidationReport,
    /// Cross-cluster node copies collapsed by the merge
    pub merged_copies: usize,
    pub config_path: PathBuf,
}

/// Replicate, allocate, merge and validate, without touching the disk
pub fn plan_network(settings: &TopologySettings) -> Result<(MergedTopology, AllocationSummary, ValidationReport)> {
    let mut fragments = build_fragments(&settings.cluster_ips, &settings.template);
    let allocator = ClusterAllocator::new(settings.management_net);
    let allocation = allocator
        .update_clusters(&mut fragments)
        .wrap_err("address allocation failed")?;

    let topology = MergedTopology::merge(fragments).wrap_err("cross-cluster merge failed")?;
    let validation = validate_topology(&topology, &settings.management_net)
        .wrap_err("merged topology is inconsistent")?;
    Ok((topology, allocation, validation))
}

/// Run the topology pipeline and write `mn_icn.cfg`
pub fn generate_network_config(settings: &TopologySettings) -> Result<NetworkSummary> {
    info!("---------------- write ICN network configuration ----------------");
    let (topology, allocation, validation) = plan_network(settings)?;

    let serializer = ConfigSerializer::from_settings(settings);
    let config_path = serializer
        .write_network_config(&topology)
        .wrap_err_with(|| format!("failed to write network configuration to {:?}", serializer.output_dir()))?;

    Ok(NetworkSummary {
        allocation,
        validation,
        merged_copies: topology.absorbed(),
        config_path,
    })
}

/// What a NAP run produced
#[derive(Debug)]
pub struct NapSummary {
    pub files: Vec<GeneratedFile>,
    pub address_lists: Vec<PathBuf>,
    /// Empty when delivery was skipped
    pub reports: Vec<ClusterDeliveryReport>,
}

impl NapSummary {
    pub fn failed_clusters(&self) -> usize {
        self.reports.iter().filter(|report| !report.is_success()).count()
    }
}

/// Map generated files to their remote directories
pub fn delivery_jobs(deployment: &NapDeployment, files: &[GeneratedFile]) -> Vec<DeliveryJob> {
    let nap_dir = deployment.remote_nap_dir();
    let httpproxy_dir = deployment.remote_httpproxy_dir();
    files
        .iter()
        .map(|file| DeliveryJob {
            cluster_index: file.cluster_index,
            host: file.cluster_ip,
            remote_dir: match file.kind {
                ConfigKind::Nap => nap_dir.clone(),
                ConfigKind::HttpProxy => httpproxy_dir.clone(),
            },
            local_file: file.path.clone(),
        })
        .collect()
}

/// Generate NAP, HTTP proxy and address list files, then ship them when a
/// transport is given
pub fn deploy_nap_configs(
    deployment: &NapDeployment,
    staging_dir: &Path,
    delivery: Option<&dyn RemoteDelivery>,
) -> Result<NapSummary> {
    info!("---------------- write NAP configurations ----------------");
    let mut files = write_nap_configs(deployment, staging_dir)
        .wrap_err("failed to write NAP configurations")?;
    files.extend(
        write_httpproxy_configs(deployment, staging_dir)
            .wrap_err("failed to write HTTP proxy configurations")?,
    );
    let address_lists = write_address_lists(deployment).wrap_err("failed to write address lists")?;

    let reports = match delivery {
        Some(adapter) => {
            let jobs = delivery_jobs(deployment, &files);
            deliver_all(adapter, jobs, deployment.delivery.workers)
                .wrap_err("delivery could not be started")?
        }
        None => {
            info!("Delivery disabled, files left in {:?}", staging_dir);
            Vec::new()
        }
    };

    let summary = NapSummary {
        files,
        address_lists,
        reports,
    };
    if summary.failed_clusters() > 0 {
        warn!(
            "{} of {} clusters did not receive every file",
            summary.failed_clusters(),
            summary.reports.len()
        );
    }
    Ok(summary)
}
