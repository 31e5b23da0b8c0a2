//! Remote delivery of generated configuration files.
//!
//! Files are shipped to the machine hosting each cluster. The transport sits
//! behind the [`RemoteDelivery`] trait so the SSH implementation can be
//! swapped for a recording mock in tests; [`deliver_all`] fans the work out
//! per cluster on a bounded worker pool.

pub mod pool;
pub mod ssh;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub use pool::deliver_all;
pub use ssh::SshDelivery;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("could not connect to {host} after {attempts} attempts: {reason}")]
    RemoteConnectFailure {
        host: IpAddr,
        attempts: u32,
        reason: String,
    },

    #[error("transfer of {path:?} to {host} failed: {reason}")]
    RemoteTransferFailure {
        host: IpAddr,
        path: PathBuf,
        reason: String,
    },

    #[error("cannot read local file {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start delivery workers: {0}")]
    WorkerPool(String),
}

/// Transport that places a local file into a directory on a remote host
pub trait RemoteDelivery: Send + Sync {
    /// Copy `local_file` to `<remote_dir>/<file name>` on `host`, creating
    /// `remote_dir` first
    fn deliver(&self, host: IpAddr, remote_dir: &Path, local_file: &Path) -> Result<(), DeliveryError>;
}

/// One file to ship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    pub cluster_index: usize,
    pub host: IpAddr,
    pub remote_dir: PathBuf,
    pub local_file: PathBuf,
}

/// Outcome of shipping one cluster's files
#[derive(Debug)]
pub struct ClusterDeliveryReport {
    pub cluster_index: usize,
    pub host: IpAddr,
    pub delivered: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, DeliveryError)>,
}

impl ClusterDeliveryReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
