//! Scripted [`MetricSource`] for tests. `None` in any slot makes that read fail.

use super::{
    CpuTimes, HostIdentity, IoCounters, MemoryCounters, MetricSource, Partition, ProbeError,
    SwapCounters, UsageCounters,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FakeSource {
    pub host: Option<HostIdentity>,
    pub physical_cores: Option<usize>,
    pub logical_cores: Option<usize>,
    pub nominal_mhz: Option<u64>,
    pub current_mhz: Option<u64>,
    /// Added to the busy/total counters on every `cpu_times` read.
    pub cpu_step: Option<CpuTimes>,
    pub temperatures: Option<Vec<f32>>,
    pub memory: Option<MemoryCounters>,
    pub swap: Option<SwapCounters>,
    pub partitions: Option<Vec<Partition>>,
    /// Device path aliases, resolved by `device_node`.
    pub aliases: HashMap<String, String>,
    pub usage: HashMap<String, UsageCounters>,
    /// Added to every device's counters on every `io_counters` read.
    pub io_step: Option<HashMap<String, IoCounters>>,
    cpu_reads: AtomicU64,
    io_reads: AtomicU64,
}

pub fn partition(device: &str, mountpoint: &str) -> Partition {
    Partition {
        device: device.to_string(),
        mountpoint: mountpoint.to_string(),
        fs_type: "ext4".to_string(),
    }
}

impl FakeSource {
    /// A healthy host with one disk mounted twice.
    pub fn healthy() -> Self {
        let mut usage = HashMap::new();
        usage.insert(
            "/".to_string(),
            UsageCounters {
                total: 1000,
                free: 250,
            },
        );
        usage.insert(
            "/home".to_string(),
            UsageCounters {
                total: 1000,
                free: 250,
            },
        );
        let mut io = HashMap::new();
        io.insert(
            "/dev/sda1".to_string(),
            IoCounters {
                read_bytes: 0,
                write_bytes: 0,
            },
        );

        Self {
            host: Some(HostIdentity {
                hostname: "probe-test".to_string(),
                os: "linux".to_string(),
                platform: "debian".to_string(),
                kernel_version: "6.1.0".to_string(),
                uptime_seconds: 3600,
                virtualization: "none".to_string(),
            }),
            physical_cores: Some(4),
            logical_cores: Some(8),
            nominal_mhz: Some(3000),
            current_mhz: Some(2400),
            cpu_step: Some(CpuTimes {
                busy: 25,
                total: 100,
            }),
            temperatures: Some(vec![41.0, 43.5]),
            memory: Some(MemoryCounters {
                total: 16_000,
                available: 12_000,
                used: 4_000,
            }),
            swap: Some(SwapCounters {
                total: 2_000,
                free: 1_500,
                used: 500,
            }),
            partitions: Some(vec![
                partition("/dev/sda1", "/"),
                partition("/dev/sda1", "/home"),
                partition("/dev/loop0", "/snap/core/1"),
                partition("tmpfs", "/run"),
            ]),
            aliases: HashMap::new(),
            usage,
            io_step: Some(io),
            cpu_reads: AtomicU64::new(0),
            io_reads: AtomicU64::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            host: None,
            physical_cores: None,
            logical_cores: None,
            nominal_mhz: None,
            current_mhz: None,
            cpu_step: None,
            temperatures: None,
            memory: None,
            swap: None,
            partitions: None,
            aliases: HashMap::new(),
            usage: HashMap::new(),
            io_step: None,
            cpu_reads: AtomicU64::new(0),
            io_reads: AtomicU64::new(0),
        }
    }
}

fn missing(counter: &str) -> ProbeError {
    ProbeError::unavailable(counter)
}

impl MetricSource for FakeSource {
    fn host_identity(&self) -> Result<HostIdentity, ProbeError> {
        self.host.clone().ok_or_else(|| missing("host identity"))
    }

    fn physical_cores(&self) -> Result<usize, ProbeError> {
        self.physical_cores.ok_or_else(|| missing("physical core count"))
    }

    fn logical_cores(&self) -> Result<usize, ProbeError> {
        self.logical_cores.ok_or_else(|| missing("logical core count"))
    }

    fn nominal_frequency_mhz(&self) -> Result<u64, ProbeError> {
        self.nominal_mhz.ok_or_else(|| missing("nominal frequency"))
    }

    fn current_frequency_mhz(&self) -> Result<u64, ProbeError> {
        self.current_mhz.ok_or_else(|| missing("current frequency"))
    }

    fn cpu_times(&self) -> Result<CpuTimes, ProbeError> {
        let step = self.cpu_step.ok_or_else(|| missing("CPU time counters"))?;
        let n = self.cpu_reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CpuTimes {
            busy: step.busy * n,
            total: step.total * n,
        })
    }

    fn cpu_temperatures(&self) -> Result<Vec<f32>, ProbeError> {
        self.temperatures.clone().ok_or_else(|| missing("CPU temperature sensor"))
    }

    fn memory(&self) -> Result<MemoryCounters, ProbeError> {
        self.memory.ok_or_else(|| missing("physical memory counters"))
    }

    fn swap(&self) -> Result<SwapCounters, ProbeError> {
        self.swap.ok_or_else(|| missing("swap counters"))
    }

    fn partitions(&self) -> Result<Vec<Partition>, ProbeError> {
        self.partitions
            .clone()
            .ok_or_else(|| ProbeError::Enumeration("mount table unreadable".to_string()))
    }

    fn device_node(&self, device: &str) -> String {
        self.aliases
            .get(device)
            .cloned()
            .unwrap_or_else(|| device.to_string())
    }

    fn usage(&self, mountpoint: &str) -> Result<UsageCounters, ProbeError> {
        self.usage
            .get(mountpoint)
            .copied()
            .ok_or_else(|| missing(&format!("usage counters for {mountpoint}")))
    }

    fn io_counters(&self) -> Result<HashMap<String, IoCounters>, ProbeError> {
        let step = self
            .io_step
            .as_ref()
            .ok_or_else(|| missing("block device I/O counters"))?;
        let n = self.io_reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(step
            .iter()
            .map(|(dev, c)| {
                (
                    dev.clone(),
                    IoCounters {
                        read_bytes: c.read_bytes * n,
                        write_bytes: c.write_bytes * n,
                    },
                )
            })
            .collect())
    }
}
