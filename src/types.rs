use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// A host and an inclusive, validated port range to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl ScanTarget {
    pub fn new(host: impl Into<String>, start_port: u16, end_port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::Config("scan target host is empty".into()));
        }
        if start_port == 0 || start_port > end_port {
            return Err(Error::Config(format!(
                "invalid port range: {start_port}-{end_port}"
            )));
        }
        Ok(Self {
            host,
            start_port,
            end_port,
        })
    }

    pub fn port_count(&self) -> usize {
        usize::from(self.end_port - self.start_port) + 1
    }

    pub fn is_single_port(&self) -> bool {
        self.start_port == self.end_port
    }
}

/// Outcome of probing one port.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub port: u16,
    pub open: bool,
    pub error: Option<String>,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    pub timestamp: String,
}

/// Aggregate results and progress counters.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub host: String,
    pub scanned_total: u64,
    pub scanned_done: u64,
    pub open_count: u64,
    pub results: Vec<ScanResult>,
}

impl ScanReport {
    /// Results in completion order carry no meaning; sort by port for display.
    pub fn sorted(mut self) -> Self {
        self.results.sort_by_key(|r| r.port);
        self
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &ScanResult> {
        self.results.iter().filter(|r| r.open)
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}
