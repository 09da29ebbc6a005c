pub mod cpu;
pub mod disk;
#[cfg(test)]
pub mod fake;
pub mod host;
pub mod memory;
pub mod sysfs;
pub mod system;

use crate::snapshot::FieldFailure;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{counter} is not available on this system")]
    Unavailable { counter: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
    #[error("enumeration failed: {0}")]
    Enumeration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnavailableCounter,
    TransientRead,
    Enumeration,
}

impl ProbeError {
    pub fn unavailable(counter: impl Into<String>) -> Self {
        Self::Unavailable {
            counter: counter.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } => FailureKind::UnavailableCounter,
            Self::Read { .. } | Self::Parse { .. } => FailureKind::TransientRead,
            Self::Enumeration(_) => FailureKind::Enumeration,
        }
    }
}

/// A probe's reading together with every fault it ran into.
#[derive(Debug, Clone, PartialEq)]
pub struct Probed<T> {
    pub value: T,
    pub failures: Vec<FieldFailure>,
}

/// Accumulates field failures inside one probe.
#[derive(Debug, Default)]
pub struct Failures(Vec<FieldFailure>);

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwraps `result`, or records a failure for `fields` and returns `fallback`.
    pub fn take_or<T>(&mut self, result: Result<T, ProbeError>, fields: &[&str], fallback: T) -> T {
        match result {
            Ok(v) => v,
            Err(err) => {
                self.record(fields, &err);
                fallback
            }
        }
    }

    pub fn record(&mut self, fields: &[&str], err: &ProbeError) {
        log_failure(fields, err);
        self.0.push(FieldFailure::new(fields.iter().copied(), err.to_string()));
    }

    pub fn push(&mut self, failure: FieldFailure) {
        self.0.push(failure);
    }

    pub fn finish<T>(self, value: T) -> Probed<T> {
        Probed {
            value,
            failures: self.0,
        }
    }
}

/// Expected absences are debug noise; anything else is worth a warning.
pub fn log_failure(fields: &[&str], err: &ProbeError) {
    match err.kind() {
        FailureKind::UnavailableCounter => {
            debug!(fields = ?fields, error = %err, "counter unavailable")
        }
        FailureKind::TransientRead | FailureKind::Enumeration => {
            warn!(fields = ?fields, error = %err, "probe read failed")
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostIdentity {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub kernel_version: String,
    pub uptime_seconds: u64,
    pub virtualization: String,
}

/// Cumulative CPU time, in ticks, across all cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCounters {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapCounters {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCounters {
    pub total: u64,
    pub free: u64,
}

/// Cumulative bytes moved by one block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Raw OS counters behind the probes. Every read is independently fallible.
pub trait MetricSource: Send + Sync {
    fn host_identity(&self) -> Result<HostIdentity, ProbeError>;
    fn physical_cores(&self) -> Result<usize, ProbeError>;
    fn logical_cores(&self) -> Result<usize, ProbeError>;
    fn nominal_frequency_mhz(&self) -> Result<u64, ProbeError>;
    fn current_frequency_mhz(&self) -> Result<u64, ProbeError>;
    fn cpu_times(&self) -> Result<CpuTimes, ProbeError>;
    fn cpu_temperatures(&self) -> Result<Vec<f32>, ProbeError>;
    fn memory(&self) -> Result<MemoryCounters, ProbeError>;
    fn swap(&self) -> Result<SwapCounters, ProbeError>;
    fn partitions(&self) -> Result<Vec<Partition>, ProbeError>;
    /// Kernel node behind a mount-table device path, the key `io_counters` uses.
    /// Paths that do not resolve are returned unchanged.
    fn device_node(&self, device: &str) -> String {
        device.to_string()
    }
    fn usage(&self, mountpoint: &str) -> Result<UsageCounters, ProbeError>;
    /// Keyed by device path (`/dev/sda`).
    fn io_counters(&self) -> Result<HashMap<String, IoCounters>, ProbeError>;
}
