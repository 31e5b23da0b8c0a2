use crate::config::{NapDeployment, NapDeploymentConfig, TopologyConfig, TopologySettings};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::info;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;

/// Parse a JSON or YAML document, chosen by file extension (JSON otherwise)
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        bail!("configuration file {:?} does not exist", path);
    }
    let file = File::open(path).wrap_err_with(|| format!("failed to open {:?}", path))?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let document = match extension.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_reader(file)
            .wrap_err_with(|| format!("failed to parse YAML in {:?}", path))?,
        _ => serde_json::from_reader(file)
            .wrap_err_with(|| format!("failed to parse JSON in {:?}", path))?,
    };
    Ok(document)
}

/// Load and validate the topology configuration
pub fn load_topology_config(config_path: &Path) -> Result<TopologySettings> {
    info!("Loading topology configuration from: {:?}", config_path);
    let config: TopologyConfig = read_document(config_path)?;
    let settings = config
        .resolve()
        .wrap_err_with(|| format!("invalid topology configuration in {:?}", config_path))?;
    info!(
        "Configuration covers {} clusters with {} template nodes each",
        settings.cluster_ips.len(),
        settings.template.len()
    );
    Ok(settings)
}

/// Load and validate the NAP deployment configuration
pub fn load_nap_config(config_path: &Path) -> Result<NapDeployment> {
    info!("Loading NAP configuration from: {:?}", config_path);
    let config: NapDeploymentConfig = read_document(config_path)?;
    let deployment = config
        .resolve()
        .wrap_err_with(|| format!("invalid NAP configuration in {:?}", config_path))?;
    info!(
        "{} NAPs per cluster across {} clusters",
        deployment.number_naps,
        deployment.cluster_ips.len()
    );
    Ok(deployment)
}
