use super::sysfs;
use super::{
    CpuTimes, HostIdentity, IoCounters, MemoryCounters, MetricSource, Partition, ProbeError,
    SwapCounters, UsageCounters,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use sysinfo::{CpuExt, System, SystemExt};

/// Live counters from the running host: `sysinfo` for portable values,
/// `/proc` and `/sys` where the kernel exposes something more precise.
pub struct SystemSource {
    system: Mutex<System>,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    // Held only while refreshing and copying counters out, never across a sampling wait.
    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemSource {
    fn host_identity(&self) -> Result<HostIdentity, ProbeError> {
        let system = self.system();
        let (Some(hostname), Some(_), Some(kernel_version)) =
            (system.host_name(), system.name(), system.kernel_version())
        else {
            return Err(ProbeError::unavailable("host identity"));
        };

        Ok(HostIdentity {
            hostname,
            os: std::env::consts::OS.to_string(),
            platform: system.distribution_id(),
            kernel_version,
            uptime_seconds: system.uptime(),
            virtualization: detect_virtualization(),
        })
    }

    fn physical_cores(&self) -> Result<usize, ProbeError> {
        self.system()
            .physical_core_count()
            .filter(|n| *n > 0)
            .ok_or_else(|| ProbeError::unavailable("physical core count"))
    }

    fn logical_cores(&self) -> Result<usize, ProbeError> {
        let mut system = self.system();
        system.refresh_cpu();
        match system.cpus().len() {
            0 => Err(ProbeError::unavailable("logical core count")),
            n => Ok(n),
        }
    }

    fn nominal_frequency_mhz(&self) -> Result<u64, ProbeError> {
        if let Ok(mhz) = nominal_frequency_from_sysfs() {
            return Ok(mhz);
        }
        let mut system = self.system();
        system.refresh_cpu();
        system
            .cpus()
            .first()
            .map(|c| c.frequency())
            .filter(|mhz| *mhz > 0)
            .ok_or_else(|| ProbeError::unavailable("nominal CPU frequency"))
    }

    fn current_frequency_mhz(&self) -> Result<u64, ProbeError> {
        current_frequency()
    }

    fn cpu_times(&self) -> Result<CpuTimes, ProbeError> {
        cpu_times()
    }

    fn cpu_temperatures(&self) -> Result<Vec<f32>, ProbeError> {
        cpu_temperatures(&mut self.system())
    }

    fn memory(&self) -> Result<MemoryCounters, ProbeError> {
        let mut system = self.system();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(ProbeError::unavailable("physical memory counters"));
        }
        Ok(MemoryCounters {
            total,
            available: system.available_memory(),
            used: system.used_memory(),
        })
    }

    fn swap(&self) -> Result<SwapCounters, ProbeError> {
        let mut system = self.system();
        system.refresh_memory();
        Ok(SwapCounters {
            total: system.total_swap(),
            free: system.free_swap(),
            used: system.used_swap(),
        })
    }

    fn partitions(&self) -> Result<Vec<Partition>, ProbeError> {
        partitions()
    }

    fn device_node(&self, device: &str) -> String {
        device_node(device)
    }

    // Measured per mountpoint so every mount-table entry can be read,
    // including ones sysinfo leaves out of its own disk list.
    fn usage(&self, mountpoint: &str) -> Result<UsageCounters, ProbeError> {
        mount_usage(mountpoint)
    }

    fn io_counters(&self) -> Result<HashMap<String, IoCounters>, ProbeError> {
        io_counters()
    }
}

#[cfg(target_os = "linux")]
fn nominal_frequency_from_sysfs() -> Result<u64, ProbeError> {
    sysfs::read_cpuinfo_max_freq()
}

#[cfg(not(target_os = "linux"))]
fn nominal_frequency_from_sysfs() -> Result<u64, ProbeError> {
    Err(ProbeError::unavailable("cpuinfo_max_freq"))
}

#[cfg(target_os = "linux")]
fn current_frequency() -> Result<u64, ProbeError> {
    sysfs::read_scaling_cur_freq()
}

#[cfg(not(target_os = "linux"))]
fn current_frequency() -> Result<u64, ProbeError> {
    Err(ProbeError::unavailable("scaling CPU frequency"))
}

#[cfg(target_os = "linux")]
fn cpu_times() -> Result<CpuTimes, ProbeError> {
    sysfs::read_cpu_times()
}

#[cfg(not(target_os = "linux"))]
fn cpu_times() -> Result<CpuTimes, ProbeError> {
    Err(ProbeError::unavailable("CPU time counters"))
}

#[cfg(target_os = "linux")]
fn cpu_temperatures(_system: &mut System) -> Result<Vec<f32>, ProbeError> {
    sysfs::read_core_temperatures()
}

#[cfg(not(target_os = "linux"))]
fn cpu_temperatures(system: &mut System) -> Result<Vec<f32>, ProbeError> {
    use sysinfo::ComponentExt;

    system.refresh_components_list();
    let temps: Vec<f32> = system
        .components()
        .iter()
        .filter(|c| sysfs::is_core_sensor_label(c.label()))
        .map(|c| c.temperature())
        .filter(|t| *t > 0.0)
        .collect();
    if temps.is_empty() {
        return Err(ProbeError::unavailable("CPU temperature sensor"));
    }
    Ok(temps)
}

#[cfg(target_os = "linux")]
fn partitions() -> Result<Vec<Partition>, ProbeError> {
    sysfs::read_mounts()
}

// Only Linux exposes a mount table with `/dev` node paths to measure against.
#[cfg(not(target_os = "linux"))]
fn partitions() -> Result<Vec<Partition>, ProbeError> {
    Err(ProbeError::unavailable("block device mount table"))
}

#[cfg(target_os = "linux")]
fn device_node(device: &str) -> String {
    sysfs::canonical_device(device)
}

#[cfg(not(target_os = "linux"))]
fn device_node(device: &str) -> String {
    device.to_string()
}

#[cfg(unix)]
fn mount_usage(mountpoint: &str) -> Result<UsageCounters, ProbeError> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(mountpoint).map_err(|_| ProbeError::Parse {
        path: mountpoint.to_string(),
        detail: "mountpoint contains a NUL byte".to_string(),
    })?;
    let mut stats = MaybeUninit::<libc::statvfs>::zeroed();
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::NotFound {
            return Err(ProbeError::unavailable(format!("usage counters for {mountpoint}")));
        }
        return Err(ProbeError::Read {
            path: mountpoint.to_string(),
            source: err,
        });
    }
    let stats = unsafe { stats.assume_init() };
    let block = stats.f_frsize as u64;
    Ok(UsageCounters {
        total: (stats.f_blocks as u64).saturating_mul(block),
        free: (stats.f_bavail as u64).saturating_mul(block),
    })
}

#[cfg(not(unix))]
fn mount_usage(mountpoint: &str) -> Result<UsageCounters, ProbeError> {
    Err(ProbeError::unavailable(format!("usage counters for {mountpoint}")))
}

#[cfg(target_os = "linux")]
fn io_counters() -> Result<HashMap<String, IoCounters>, ProbeError> {
    sysfs::read_diskstats()
}

#[cfg(not(target_os = "linux"))]
fn io_counters() -> Result<HashMap<String, IoCounters>, ProbeError> {
    Err(ProbeError::unavailable("block device I/O counters"))
}

#[cfg(target_os = "linux")]
fn detect_virtualization() -> String {
    sysfs::detect_virtualization()
}

#[cfg(not(target_os = "linux"))]
fn detect_virtualization() -> String {
    "none".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::disk::select_physical;
    use crate::collectors::FailureKind;

    #[cfg(unix)]
    #[test]
    fn root_mount_usage_is_consistent() {
        let usage = mount_usage("/").expect("statvfs on /");
        assert!(usage.total > 0);
        assert!(usage.free <= usage.total);
    }

    #[cfg(unix)]
    #[test]
    fn missing_mountpoint_is_unavailable() {
        let err = mount_usage("/hostprobe/no/such/mount").unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnavailableCounter);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn every_kept_partition_can_be_measured() {
        let source = SystemSource::new();
        let partitions = source.partitions().expect("mount table");
        for kept in select_physical(partitions, |device| source.device_node(device)) {
            let usage = source.usage(&kept.partition.mountpoint);
            assert!(
                usage.is_ok(),
                "{} on {}: {:?}",
                kept.partition.device,
                kept.partition.mountpoint,
                usage
            );
        }
    }
}
