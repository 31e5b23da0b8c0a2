//! Bounded per-cluster fan-out of delivery jobs.

use super::{ClusterDeliveryReport, DeliveryError, DeliveryJob, RemoteDelivery};
use log::{error, info};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Ship every job, clusters in parallel on at most `workers` threads.
///
/// Jobs of one cluster run in submission order on the same worker. A failed
/// file is recorded in its cluster's report and never stops the remaining
/// files or clusters. Reports come back in cluster order.
pub fn deliver_all(
    adapter: &dyn RemoteDelivery,
    jobs: Vec<DeliveryJob>,
    workers: usize,
) -> Result<Vec<ClusterDeliveryReport>, DeliveryError> {
    let mut clusters: BTreeMap<usize, Vec<DeliveryJob>> = BTreeMap::new();
    for job in jobs {
        clusters.entry(job.cluster_index).or_default().push(job);
    }
    if clusters.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("delivery-{}", index))
        .build()
        .map_err(|e| DeliveryError::WorkerPool(e.to_string()))?;
    info!(
        "Delivering to {} clusters with {} workers",
        clusters.len(),
        pool.current_num_threads()
    );

    let groups: Vec<(usize, Vec<DeliveryJob>)> = clusters.into_iter().collect();
    let reports = pool.install(|| {
        groups
            .into_par_iter()
            .map(|(cluster_index, jobs)| deliver_cluster(adapter, cluster_index, jobs))
            .collect::<Vec<_>>()
    });

    let failed = reports.iter().filter(|report| !report.is_success()).count();
    info!("Delivery finished: {} of {} clusters complete", reports.len() - failed, reports.len());
    Ok(reports)
}

fn deliver_cluster(
    adapter: &dyn RemoteDelivery,
    cluster_index: usize,
    jobs: Vec<DeliveryJob>,
) -> ClusterDeliveryReport {
    let host = jobs[0].host;
    let mut report = ClusterDeliveryReport {
        cluster_index,
        host,
        delivered: Vec::new(),
        failures: Vec::new(),
    };
    for job in jobs {
        match adapter.deliver(job.host, &job.remote_dir, &job.local_file) {
            Ok(()) => report.delivered.push(job.local_file),
            Err(e) => {
                error!("cluster {} ({}): {}", cluster_index, job.host, e);
                report.failures.push((job.local_file, e));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Records deliveries and refuses every file sent to `unreachable`
    struct RecordingDelivery {
        unreachable: Option<IpAddr>,
        delivered: Mutex<Vec<(IpAddr, PathBuf)>>,
    }

    impl RecordingDelivery {
        fn new(unreachable: Option<IpAddr>) -> Self {
            Self {
                unreachable,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl RemoteDelivery for RecordingDelivery {
        fn deliver(&self, host: IpAddr, remote_dir: &Path, local_file: &Path) -> Result<(), DeliveryError> {
            if Some(host) == self.unreachable {
                return Err(DeliveryError::RemoteConnectFailure {
                    host,
                    attempts: 6,
                    reason: "connection refused".to_string(),
                });
            }
            let file_name = local_file.file_name().unwrap();
            self.delivered.lock().unwrap().push((host, remote_dir.join(file_name)));
            Ok(())
        }
    }

    fn job(cluster_index: usize, host: &str, file: &str) -> DeliveryJob {
        DeliveryJob {
            cluster_index,
            host: host.parse().unwrap(),
            remote_dir: PathBuf::from("/home/icn/nap"),
            local_file: PathBuf::from(format!("/tmp/staging/{}", file)),
        }
    }

    #[test]
    fn test_reports_in_cluster_order() {
        let adapter = RecordingDelivery::new(None);
        let jobs = vec![
            job(1, "192.168.1.20", "nap-00000005.cfg"),
            job(0, "192.168.1.10", "nap-00000001.cfg"),
            job(0, "192.168.1.10", "nap-00000003.cfg"),
        ];
        let reports = deliver_all(&adapter, jobs, 2).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].cluster_index, 0);
        assert_eq!(reports[0].delivered.len(), 2);
        assert_eq!(reports[1].host, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert!(reports.iter().all(|r| r.is_success()));

        let delivered = adapter.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 3);
        assert!(delivered.contains(&(
            "192.168.1.10".parse().unwrap(),
            PathBuf::from("/home/icn/nap/nap-00000003.cfg")
        )));
    }

    #[test]
    fn test_failure_does_not_abort_other_clusters() {
        let unreachable: IpAddr = "192.168.1.10".parse().unwrap();
        let adapter = RecordingDelivery::new(Some(unreachable));
        let jobs = vec![
            job(0, "192.168.1.10", "nap-00000001.cfg"),
            job(0, "192.168.1.10", "nap-00000003.cfg"),
            job(1, "192.168.1.20", "nap-00000005.cfg"),
        ];
        let reports = deliver_all(&adapter, jobs, 1).unwrap();

        assert!(!reports[0].is_success());
        assert_eq!(reports[0].failures.len(), 2);
        assert!(matches!(
            reports[0].failures[0].1,
            DeliveryError::RemoteConnectFailure { .. }
        ));
        assert!(reports[1].is_success());
        assert_eq!(adapter.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_no_jobs() {
        let adapter = RecordingDelivery::new(None);
        assert!(deliver_all(&adapter, Vec::new(), 4).unwrap().is_empty());
    }
}
