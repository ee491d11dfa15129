use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::addr::join_host_port;
use crate::deadline::Deadline;
use crate::dialer::connect_tcp;
use crate::types::{ScanReport, ScanResult, ScanTarget};

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_WORKERS: usize = 100;
const MAX_WORKERS: usize = 5_000;

/// TCP connect scanner over a contiguous port range.
///
/// - A fixed pool of workers pulls the next unclaimed port from a shared cursor, so
///   concurrency is bounded by the worker count, never by the size of the range.
/// - Each probe is a single connect bounded by the per-port timeout; the socket is closed
///   immediately whatever the outcome.
/// - A failed probe is recorded as a closed port and never stops the scan.
#[derive(Debug, Clone)]
pub struct PortScanner {
    target: ScanTarget,
    timeout: Duration,
    workers: usize,
}

impl PortScanner {
    pub fn new(target: ScanTarget) -> Self {
        let workers = if target.is_single_port() {
            1
        } else {
            DEFAULT_WORKERS
        };
        Self {
            target,
            timeout: DEFAULT_SCAN_TIMEOUT,
            workers,
        }
    }

    /// Per-port connect timeout; zero keeps the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn scan(&self) -> ScanReport {
        self.scan_with_cancel(CancellationToken::new()).await
    }

    /// Like [`PortScanner::scan`], but stops handing out ports once `cancel` fires.
    /// Probes already in flight complete and are reported.
    pub async fn scan_with_cancel(&self, cancel: CancellationToken) -> ScanReport {
        let total = self.target.port_count();
        let host: Arc<str> = Arc::from(self.target.host.as_str());
        let end = u32::from(self.target.end_port);
        let next_port = Arc::new(AtomicU32::new(u32::from(self.target.start_port)));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));

        tracing::debug!(
            host = %host,
            start = self.target.start_port,
            end = self.target.end_port,
            workers = self.workers,
            timeout = ?self.timeout,
            "starting port scan"
        );

        let mut set = JoinSet::new();
        for _ in 0..self.workers.min(total) {
            let host = host.clone();
            let next_port = next_port.clone();
            let results = results.clone();
            let cancel = cancel.clone();
            let timeout = self.timeout;

            set.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let port = next_port.fetch_add(1, Ordering::Relaxed);
                    if port > end {
                        break;
                    }
                    let result = probe_port(&host, port as u16, timeout).await;
                    results.lock().await.push(result);
                }
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "scan worker failed");
            }
        }

        let results = std::mem::take(&mut *results.lock().await);
        let open_count = results.iter().filter(|r| r.open).count() as u64;
        tracing::debug!(host = %host, scanned = results.len(), open = open_count, "port scan finished");

        ScanReport {
            host: self.target.host.clone(),
            scanned_total: total as u64,
            scanned_done: results.len() as u64,
            open_count,
            results,
        }
    }
}

/// Single connect attempt; the stream is dropped (closed) as soon as it is established.
async fn probe_port(host: &str, port: u16, timeout: Duration) -> ScanResult {
    let addr = join_host_port(host, port);
    let start = Instant::now();
    let res = connect_tcp(&addr, &Deadline::after(timeout)).await;
    let latency = start.elapsed();

    let (open, error) = match res {
        Ok(stream) => {
            drop(stream);
            (true, None)
        }
        Err(e) => (false, Some(e.to_string())),
    };
    tracing::trace!(port, open, ?latency, "probed");

    ScanResult {
        port,
        open,
        error,
        latency,
        timestamp: now_rfc3339(),
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults_follow_range_size() {
        let single = PortScanner::new(ScanTarget::new("127.0.0.1", 80, 80).unwrap());
        assert_eq!(single.workers(), 1);
        let range = PortScanner::new(ScanTarget::new("127.0.0.1", 1, 1024).unwrap());
        assert_eq!(range.workers(), DEFAULT_WORKERS);
        assert_eq!(range.clone().with_workers(0).workers(), 1);
    }

    #[tokio::test]
    async fn cancelled_scan_probes_nothing() {
        let target = ScanTarget::new("127.0.0.1", 1, 100).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = PortScanner::new(target).scan_with_cancel(cancel).await;
        assert_eq!(report.scanned_total, 100);
        assert_eq!(report.scanned_done, 0);
        assert!(report.results.is_empty());
    }
}
