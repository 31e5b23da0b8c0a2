use clap::Parser;
use color_eyre::eyre::bail;
use color_eyre::Result;
use env_logger::Env;
use icnsim::delivery::{RemoteDelivery, SshDelivery};
use icnsim::{config_loader, orchestrator};
use log::{error, info};
use std::path::PathBuf;

/// Network configuration generator for emulated ICN clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Topology configuration (JSON or YAML) used to write mn_icn.cfg
    #[arg(short, long)]
    icn: Option<PathBuf>,

    /// NAP deployment configuration (JSON or YAML)
    #[arg(short, long)]
    nap: Option<PathBuf>,

    /// Local directory for generated NAP and proxy files
    #[arg(long, default_value = "nap_configs")]
    staging: PathBuf,

    /// Generate NAP files without shipping them to the cluster hosts
    #[arg(long)]
    no_deliver: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    if args.icn.is_none() && args.nap.is_none() {
        bail!("nothing to do: pass a topology configuration (--icn) and/or a NAP configuration (--nap)");
    }

    if let Some(path) = &args.icn {
        let settings = config_loader::load_topology_config(path)?;
        let summary = orchestrator::generate_network_config(&settings)?;
        info!(
            "Network configuration written to {:?}: {} nodes, {} connections, {} merged copies",
            summary.config_path,
            summary.validation.nodes,
            summary.validation.connections,
            summary.merged_copies
        );
    }

    if let Some(path) = &args.nap {
        let deployment = config_loader::load_nap_config(path)?;
        let transport = (!args.no_deliver).then(|| SshDelivery::from_deployment(&deployment));
        let summary = orchestrator::deploy_nap_configs(
            &deployment,
            &args.staging,
            transport.as_ref().map(|t| t as &dyn RemoteDelivery),
        )?;

        for report in &summary.reports {
            if !report.is_success() {
                for (file, e) in &report.failures {
                    error!("cluster {} ({}): {:?} not delivered: {}", report.cluster_index, report.host, file, e);
                }
            }
        }
        info!(
            "Generated {} NAP files and {} address lists",
            summary.files.len(),
            summary.address_lists.len()
        );
        if summary.failed_clusters() > 0 {
            bail!("{} clusters did not receive their configuration", summary.failed_clusters());
        }
    }

    Ok(())
}
