use crate::collectors::cpu::probe_cpu;
use crate::collectors::disk::probe_disk;
use crate::collectors::host::probe_host;
use crate::collectors::memory::probe_memory;
use crate::collectors::{MetricSource, Probed};
use crate::extensions::ExtensionRegistry;
use crate::snapshot::{CpuReading, DiskReading, FieldFailure, HostReading, MemoryReading, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs the probes against one [`MetricSource`] and merges their readings.
#[derive(Clone)]
pub struct Collector {
    source: Arc<dyn MetricSource>,
    cpu_window: Duration,
    disk_io_window: Option<Duration>,
    extensions: Arc<ExtensionRegistry>,
}

impl Collector {
    pub fn new(
        source: Arc<dyn MetricSource>,
        cpu_window: Duration,
        disk_io_window: Option<Duration>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        Self {
            source,
            cpu_window,
            disk_io_window,
            extensions,
        }
    }

    /// One full collection cycle. Never fails: whatever could not be read is
    /// a sentinel in the snapshot and an entry in the failure list, ordered
    /// cpu, memory, disk, host, extensions.
    pub async fn collect(&self) -> (Snapshot, Vec<FieldFailure>) {
        let (cpu, memory, disk, host, (extensions, extension_failures)) = tokio::join!(
            self.cpu(),
            self.memory(),
            self.disk(),
            self.host(),
            self.extensions.collect(),
        );

        let mut failures = Vec::with_capacity(
            cpu.failures.len()
                + memory.failures.len()
                + disk.failures.len()
                + host.failures.len()
                + extension_failures.len(),
        );
        failures.extend(cpu.failures);
        failures.extend(memory.failures);
        failures.extend(disk.failures);
        failures.extend(host.failures);
        failures.extend(extension_failures);
        debug!(failures = failures.len(), "collection finished");

        let snapshot = Snapshot {
            cpu: cpu.value,
            memory: memory.value,
            disk: disk.value,
            host: host.value,
            extensions,
        };
        (snapshot, failures)
    }

    pub async fn cpu(&self) -> Probed<CpuReading> {
        probe_cpu(self.source.as_ref(), self.cpu_window).await
    }

    pub async fn memory(&self) -> Probed<MemoryReading> {
        probe_memory(self.source.as_ref())
    }

    pub async fn disk(&self) -> Probed<Vec<DiskReading>> {
        probe_disk(self.source.as_ref(), self.disk_io_window).await
    }

    pub async fn host(&self) -> Probed<HostReading> {
        probe_host(self.source.as_ref())
    }
}
