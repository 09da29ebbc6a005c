//! Readers for Linux `/proc` and `/sys` text files.
//!
//! Parsers are plain functions over file contents so they can be exercised on
//! fixtures; the `read_*` wrappers add the file access and map I/O errors onto
//! [`ProbeError`].

use super::{CpuTimes, IoCounters, Partition, ProbeError};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const SECTOR_BYTES: u64 = 512;

pub fn read_trimmed(path: impl AsRef<Path>) -> Result<String, ProbeError> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(ProbeError::unavailable(path.display().to_string()))
        }
        Err(source) => Err(ProbeError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Aggregate `cpu` line of `/proc/stat`. Busy time excludes idle and iowait;
/// guest time is already folded into user/nice by the kernel and is not added twice.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let total = values.iter().fold(0_u64, |acc, v| acc.saturating_add(*v));
    let idle = values[3].saturating_add(values.get(4).copied().unwrap_or(0));
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

pub fn read_cpu_times() -> Result<CpuTimes, ProbeError> {
    let path = "/proc/stat";
    let text = read_trimmed(path)?;
    parse_cpu_times(&text).ok_or_else(|| ProbeError::Parse {
        path: path.to_string(),
        detail: "missing or malformed aggregate cpu line".to_string(),
    })
}

/// `/proc/mounts` (or `/proc/self/mounts`), in mount-table order.
pub fn parse_mounts(text: &str) -> Vec<Partition> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mountpoint = parts.next()?;
            let fs_type = parts.next()?;
            Some(Partition {
                device: unescape_mount_field(device),
                mountpoint: unescape_mount_field(mountpoint),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

pub fn read_mounts() -> Result<Vec<Partition>, ProbeError> {
    let text = read_trimmed("/proc/self/mounts")
        .or_else(|_| read_trimmed("/proc/mounts"))
        .map_err(|err| ProbeError::Enumeration(err.to_string()))?;
    Ok(parse_mounts(&text))
}

/// Resolves device symlinks such as `/dev/mapper/*` or `/dev/disk/by-uuid/*` to
/// the node the kernel names in `/proc/diskstats`. Anything that is not an
/// absolute, resolvable path comes back unchanged.
pub fn canonical_device(raw: &str) -> String {
    if !raw.starts_with('/') {
        return raw.to_string();
    }
    fs::canonicalize(raw)
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

// The kernel escapes space, tab, newline and backslash as three-digit octal.
fn unescape_mount_field(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|s| u8::from_str_radix(s, 8).ok());
            if let Some(v) = octal {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// `/proc/diskstats`, keyed by `/dev/<name>`.
pub fn parse_diskstats(text: &str) -> HashMap<String, IoCounters> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            let sectors_read: u64 = parts[5].parse().ok()?;
            let sectors_written: u64 = parts[9].parse().ok()?;
            Some((
                format!("/dev/{}", parts[2]),
                IoCounters {
                    read_bytes: sectors_read.saturating_mul(SECTOR_BYTES),
                    write_bytes: sectors_written.saturating_mul(SECTOR_BYTES),
                },
            ))
        })
        .collect()
}

pub fn read_diskstats() -> Result<HashMap<String, IoCounters>, ProbeError> {
    let text = read_trimmed("/proc/diskstats")?;
    Ok(parse_diskstats(&text))
}

/// Sysfs temperatures are millidegrees Celsius.
pub fn parse_millidegrees(text: &str) -> Option<f32> {
    let raw: i64 = text.trim().parse().ok()?;
    Some(raw as f32 / 1000.0)
}

pub fn is_core_sensor_label(label: &str) -> bool {
    let label = label.to_lowercase();
    // tctl is the AMD control temperature
    label.contains("core") || label.contains("tctl")
}

/// Every hwmon input whose label names a CPU core, falling back to CPU thermal
/// zones when no hwmon core sensor exists.
pub fn read_core_temperatures() -> Result<Vec<f32>, ProbeError> {
    let mut temps = Vec::new();
    for dir in sorted_entries("/sys/class/hwmon", "hwmon") {
        for input in sorted_entries(&dir, "temp") {
            let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(prefix) = name.strip_suffix("_input") else {
                continue;
            };
            let Ok(label) = read_trimmed(dir.join(format!("{prefix}_label"))) else {
                continue;
            };
            if !is_core_sensor_label(&label) {
                continue;
            }
            if let Some(t) = read_trimmed(&input).ok().and_then(|s| parse_millidegrees(&s)) {
                temps.push(t);
            }
        }
    }

    if temps.is_empty() {
        for zone in sorted_entries("/sys/class/thermal", "thermal_zone") {
            let Ok(kind) = read_trimmed(zone.join("type")) else {
                continue;
            };
            let kind = kind.to_lowercase();
            if !(kind.contains("cpu") || kind.contains("pkg") || kind.contains("soc")) {
                continue;
            }
            if let Some(t) = read_trimmed(zone.join("temp"))
                .ok()
                .and_then(|s| parse_millidegrees(&s))
            {
                temps.push(t);
            }
        }
    }

    if temps.is_empty() {
        return Err(ProbeError::unavailable("CPU temperature sensor"));
    }
    Ok(temps)
}

/// Reads a cpufreq file (kHz) and returns MHz.
pub fn read_khz_as_mhz(path: impl AsRef<Path>) -> Result<u64, ProbeError> {
    let path = path.as_ref();
    let text = read_trimmed(path)?;
    let khz: u64 = text.parse().map_err(|_| ProbeError::Parse {
        path: path.display().to_string(),
        detail: format!("expected integer kHz value, got '{text}'"),
    })?;
    Ok(khz / 1000)
}

pub fn read_scaling_cur_freq() -> Result<u64, ProbeError> {
    read_khz_as_mhz("/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq")
}

pub fn read_cpuinfo_max_freq() -> Result<u64, ProbeError> {
    read_khz_as_mhz("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

pub fn parse_loadavg(text: &str) -> Option<LoadAverage> {
    let mut parts = text.split_whitespace().map(|v| v.parse::<f64>().ok());
    Some(LoadAverage {
        one: parts.next()??,
        five: parts.next()??,
        fifteen: parts.next()??,
    })
}

pub fn read_loadavg() -> Result<LoadAverage, ProbeError> {
    let path = "/proc/loadavg";
    let text = read_trimmed(path)?;
    parse_loadavg(&text).ok_or_else(|| ProbeError::Parse {
        path: path.to_string(),
        detail: format!("unexpected content '{text}'"),
    })
}

pub fn classify_cgroup(text: &str) -> Option<&'static str> {
    if text.contains("docker") {
        Some("docker")
    } else if text.contains("lxc") {
        Some("lxc")
    } else if text.contains("kubepods") {
        Some("kubernetes")
    } else {
        None
    }
}

pub fn classify_dmi(vendor: &str, product: &str) -> Option<&'static str> {
    let combined = format!("{vendor} {product}").to_lowercase();
    if combined.contains("kvm") || combined.contains("qemu") {
        Some("kvm")
    } else if combined.contains("vmware") {
        Some("vmware")
    } else if combined.contains("virtualbox") {
        Some("vbox")
    } else if combined.contains("microsoft") && combined.contains("virtual machine") {
        Some("hyperv")
    } else if combined.contains("xen") {
        Some("xen")
    } else {
        None
    }
}

/// `"<system>/<role>"` such as `kvm/guest`, or `none` on bare metal.
pub fn detect_virtualization() -> String {
    if Path::new("/.dockerenv").exists() {
        return "docker/guest".to_string();
    }
    if let Some(system) = read_trimmed("/proc/1/cgroup")
        .ok()
        .as_deref()
        .and_then(classify_cgroup)
    {
        return format!("{system}/guest");
    }
    if Path::new("/proc/xen").exists() {
        let role = match read_trimmed("/proc/xen/capabilities") {
            Ok(caps) if caps.contains("control_d") => "host",
            _ => "guest",
        };
        return format!("xen/{role}");
    }
    let vendor = read_trimmed("/sys/class/dmi/id/sys_vendor").unwrap_or_default();
    let product = read_trimmed("/sys/class/dmi/id/product_name").unwrap_or_default();
    if let Some(system) = classify_dmi(&vendor, &product) {
        return format!("{system}/guest");
    }
    if read_trimmed("/proc/modules").is_ok_and(|m| m.lines().any(|l| l.starts_with("kvm "))) {
        return "kvm/host".to_string();
    }
    if read_trimmed("/proc/cpuinfo").is_ok_and(|c| c.contains(" hypervisor")) {
        return "hypervisor/guest".to_string();
    }
    "none".to_string()
}

fn sorted_entries(dir: impl AsRef<Path>, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    paths.sort();
    paths
}
