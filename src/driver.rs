//! Concurrent load generation.
//!
//! `workers` tasks each run `times` sequential transfers and hand a single
//! [`Performance`] sample back over a channel. The report sums the bytes and
//! takes the slowest worker's duration as the run's wall-clock time.

use crate::client;
use crate::config::SenderConfig;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Ids are `worker * ID_STRIDE + iteration`.
const ID_STRIDE: u64 = 10_000;

/// One worker's totals over its full sequence of transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Performance {
    pub worker: u64,
    pub total_size: u64,
    pub duration: Duration,
    pub completed: u64,
    pub failed: u64,
}

/// Aggregate over all workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub total_size: u64,
    pub duration: Duration,
    pub completed: u64,
    pub failed: u64,
}

impl Report {
    /// Fold one worker sample into the report.
    pub fn add(&mut self, sample: &Performance) {
        self.total_size += sample.total_size;
        self.duration = self.duration.max(sample.duration);
        self.completed += sample.completed;
        self.failed += sample.failed;
    }

    /// Bytes per millisecond; `None` when no measurable time passed.
    pub fn bytes_per_ms(&self) -> Option<u64> {
        let millis = u64::try_from(self.duration.as_millis()).ok()?;
        (millis > 0).then(|| self.total_size / millis)
    }

    pub fn bytes_per_sec(&self) -> Option<f64> {
        let secs = self.duration.as_secs_f64();
        (secs > 0.0).then(|| self.total_size as f64 / secs)
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total size {}, duration {} ms, ",
            self.total_size,
            self.duration.as_millis()
        )?;
        match self.bytes_per_ms() {
            Some(rate) => write!(f, "performance {} bytes/ms", rate),
            None => write!(f, "performance n/a"),
        }
    }
}

/// Transfer id for `iteration` of `worker`.
pub fn transfer_id(worker: u64, iteration: u64) -> u64 {
    worker * ID_STRIDE + iteration
}

/// Run all workers to completion and aggregate their samples.
pub async fn run(config: &SenderConfig) -> Report {
    info!(
        address = %config.address,
        workers = config.workers,
        times = config.times,
        "Starting load run"
    );

    let (tx, mut rx) = mpsc::channel(config.workers.max(1));

    for worker in 1..=config.workers as u64 {
        let tx = tx.clone();
        let address = config.address.clone();
        let times = config.times;
        let fail_fast = config.fail_fast;

        tokio::spawn(async move {
            let sample = run_worker(worker, times, &address, fail_fast).await;
            let _ = tx.send(sample).await;
        });
    }
    drop(tx);

    let mut report = Report::default();
    while let Some(sample) = rx.recv().await {
        debug!(
            worker = sample.worker,
            total_size = sample.total_size,
            duration_ms = sample.duration.as_millis() as u64,
            completed = sample.completed,
            failed = sample.failed,
            "Worker finished"
        );
        report.add(&sample);
    }

    info!(
        total_size = report.total_size,
        duration_ms = report.duration.as_millis() as u64,
        completed = report.completed,
        failed = report.failed,
        mb_per_sec = report.bytes_per_sec().map(|r| r / 1_000_000.0),
        "{}",
        report
    );
    report
}

/// Run `times` sequential transfers for one worker.
async fn run_worker(worker: u64, times: usize, address: &str, fail_fast: bool) -> Performance {
    let start = Instant::now();
    let mut sample = Performance {
        worker,
        total_size: 0,
        duration: Duration::ZERO,
        completed: 0,
        failed: 0,
    };

    for iteration in 0..times as u64 {
        debug!(worker, "{:04}: sending file to {}", iteration + 1, address);

        match client::send_generated(transfer_id(worker, iteration), address).await {
            Ok(bytes) => {
                sample.total_size += bytes;
                sample.completed += 1;
            }
            Err(e) => {
                warn!(worker, iteration, error = %e, "Transfer failed");
                sample.failed += 1;
                if fail_fast {
                    break;
                }
            }
        }
    }

    sample.duration = start.elapsed();
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::HEADER_LEN;
    use crate::server::Server;
    use std::path::Path;
    use tempfile::TempDir;

    fn sample(total_size: u64, millis: u64) -> Performance {
        Performance {
            worker: 1,
            total_size,
            duration: Duration::from_millis(millis),
            completed: 1,
            failed: 0,
        }
    }

    fn dir_totals(path: &Path) -> (usize, u64) {
        let mut count = 0;
        let mut bytes = 0;
        for entry in std::fs::read_dir(path).unwrap() {
            count += 1;
            bytes += entry.unwrap().metadata().unwrap().len();
        }
        (count, bytes)
    }

    #[test]
    fn test_transfer_id() {
        assert_eq!(transfer_id(1, 0), 10_000);
        assert_eq!(transfer_id(4, 4), 40_004);
    }

    #[test]
    fn test_report_aggregation() {
        let mut report = Report::default();
        report.add(&sample(1000, 20));
        report.add(&sample(3000, 50));
        report.add(&sample(500, 10));

        assert_eq!(report.total_size, 4500);
        assert_eq!(report.duration, Duration::from_millis(50));
        assert_eq!(report.completed, 3);
        assert_eq!(report.bytes_per_ms(), Some(90));
        let rate = report.bytes_per_sec().unwrap();
        assert!((rate - 90_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_report_zero_duration() {
        let mut report = Report::default();
        report.add(&sample(1000, 0));

        assert_eq!(report.bytes_per_ms(), None);
        assert_eq!(report.bytes_per_sec(), None);
        assert!(report.to_string().ends_with("performance n/a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_load_run_against_server() {
        let dir = TempDir::new().unwrap();
        let server = Server::bind(&ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            folder: dir.path().to_path_buf(),
            accept_backoff: Duration::from_millis(10),
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(async move { server.serve().await });

        let report = run(&SenderConfig {
            address: addr.to_string(),
            times: 5,
            workers: 4,
            fail_fast: true,
        })
        .await;

        assert_eq!(report.completed, 20);
        assert_eq!(report.failed, 0);

        // Sessions may still be flushing after the senders return
        let expected_payload = report.total_size - 20 * HEADER_LEN as u64;
        let mut totals = dir_totals(dir.path());
        for _ in 0..200 {
            if totals == (20, expected_payload) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            totals = dir_totals(dir.path());
        }
        assert_eq!(totals, (20, expected_payload));

        task.abort();
    }

    #[tokio::test]
    async fn test_load_run_unreachable() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let report = run(&SenderConfig {
            address: addr,
            times: 3,
            workers: 2,
            fail_fast: false,
        })
        .await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 6);
        assert_eq!(report.total_size, 0);
    }
}
