use super::{Failures, IoCounters, MetricSource, Partition, ProbeError, Probed};
use crate::snapshot::DiskReading;
use crate::units;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::trace;

const DISK_FIELDS: [&str; 3] = ["disk.total_bytes", "disk.free_bytes", "disk.usage_fraction"];
const SPEED_FIELDS: [&str; 2] = ["disk.read_bytes_per_sec", "disk.write_bytes_per_sec"];

pub fn is_block_device(device: &str) -> bool {
    // loop devices back snap/container images and would double count the real disk
    device.starts_with("/dev/") && !device.starts_with("/dev/loop")
}

/// A mounted partition kept for measurement, with the kernel node its device
/// path resolves to (`/dev/mapper/vg-root` resolves to `/dev/dm-0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDevice {
    pub partition: Partition,
    pub node: String,
}

/// Real block devices only, one entry per kernel node; the first mount seen wins.
pub fn select_physical(
    partitions: Vec<Partition>,
    node_of: impl Fn(&str) -> String,
) -> Vec<PhysicalDevice> {
    let mut seen = HashSet::new();
    partitions
        .into_iter()
        .filter_map(|partition| {
            let node = node_of(&partition.device);
            if is_block_device(&node) && seen.insert(node.clone()) {
                return Some(PhysicalDevice { partition, node });
            }
            trace!(
                device = %partition.device,
                node = %node,
                mountpoint = %partition.mountpoint,
                fs_type = %partition.fs_type,
                "partition skipped"
            );
            None
        })
        .collect()
}

/// One reading per physical device. Never returns an empty list: when nothing
/// could be measured the single sentinel reading stands in.
///
/// With `io_window` set, block-device I/O counters are sampled across that
/// window and reported as bytes per second.
pub async fn probe_disk(
    source: &dyn MetricSource,
    io_window: Option<Duration>,
) -> Probed<Vec<DiskReading>> {
    let mut failures = Failures::new();

    let partitions = match source.partitions() {
        Ok(p) => p,
        Err(err) => {
            failures.record(&DISK_FIELDS, &err);
            return failures.finish(vec![DiskReading::sentinel()]);
        }
    };

    let physical = select_physical(partitions, |device| source.device_node(device));
    if physical.is_empty() {
        failures.record(&DISK_FIELDS, &ProbeError::unavailable("physical block device"));
        return failures.finish(vec![DiskReading::sentinel()]);
    }

    let mut readings = Vec::with_capacity(physical.len());
    let mut nodes = Vec::with_capacity(physical.len());
    for PhysicalDevice { partition, node } in physical {
        match source.usage(&partition.mountpoint) {
            Ok(usage) => {
                let free = usage.free.min(usage.total);
                let used = usage.total - free;
                readings.push(DiskReading {
                    device: partition.device,
                    mountpoint: partition.mountpoint,
                    total_bytes: Some(usage.total),
                    free_bytes: Some(free),
                    usage_fraction: units::fraction(used, usage.total),
                    read_bytes_per_sec: None,
                    write_bytes_per_sec: None,
                });
                nodes.push(node);
            }
            Err(err) => {
                let tag = format!("disk[{}]", partition.mountpoint);
                failures.record(&[tag.as_str()], &err);
            }
        }
    }

    if readings.is_empty() {
        return failures.finish(vec![DiskReading::sentinel()]);
    }

    if let Some(window) = io_window {
        sample_speeds(source, window, &mut readings, &nodes, &mut failures).await;
    }

    failures.finish(readings)
}

// `nodes[i]` is the diskstats key for `readings[i]`.
async fn sample_speeds(
    source: &dyn MetricSource,
    window: Duration,
    readings: &mut [DiskReading],
    nodes: &[String],
    failures: &mut Failures,
) {
    let started = Instant::now();
    let before = match source.io_counters() {
        Ok(c) => c,
        Err(err) => {
            failures.record(&SPEED_FIELDS, &err);
            return;
        }
    };
    tokio::time::sleep(window).await;
    let after = match source.io_counters() {
        Ok(c) => c,
        Err(err) => {
            failures.record(&SPEED_FIELDS, &err);
            return;
        }
    };
    let elapsed = started.elapsed().as_secs_f64().max(0.001);

    for (reading, node) in readings.iter_mut().zip(nodes) {
        match bytes_per_sec(&before, &after, node, elapsed) {
            Some((read, write)) => {
                reading.read_bytes_per_sec = Some(read);
                reading.write_bytes_per_sec = Some(write);
            }
            None => {
                let read_tag = format!("disk[{}].read_bytes_per_sec", reading.mountpoint);
                let write_tag = format!("disk[{}].write_bytes_per_sec", reading.mountpoint);
                failures.record(
                    &[read_tag.as_str(), write_tag.as_str()],
                    &ProbeError::unavailable(format!("I/O counters for {node}")),
                );
            }
        }
    }
}

fn bytes_per_sec(
    before: &HashMap<String, IoCounters>,
    after: &HashMap<String, IoCounters>,
    node: &str,
    elapsed_secs: f64,
) -> Option<(u64, u64)> {
    let (start, end) = (before.get(node)?, after.get(node)?);
    let rate = |delta: u64| (delta as f64 / elapsed_secs).round() as u64;
    Some((
        rate(end.read_bytes.saturating_sub(start.read_bytes)),
        rate(end.write_bytes.saturating_sub(start.write_bytes)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::fake::{partition, FakeSource};
    use crate::collectors::UsageCounters;

    const WINDOW: Duration = Duration::from_millis(5);

    #[test]
    fn dedup_keeps_first_real_device() {
        let selected = select_physical(
            vec![
                partition("/dev/sda1", "/"),
                partition("/dev/sda1", "/var/lib/docker"),
                partition("/dev/loop0", "/snap/core/1"),
                partition("tmpfs", "/run"),
                partition("/dev/nvme0n1p1", "/boot/efi"),
            ],
            str::to_string,
        );
        let devices: Vec<&str> = selected.iter().map(|d| d.node.as_str()).collect();
        assert_eq!(devices, vec!["/dev/sda1", "/dev/nvme0n1p1"]);
        assert_eq!(selected[0].partition.mountpoint, "/");
    }

    #[test]
    fn dedup_follows_device_aliases() {
        let selected = select_physical(
            vec![
                partition("/dev/disk/by-uuid/0b5e", "/"),
                partition("/dev/sda1", "/home"),
                partition("/dev/disk/by-label/snap", "/snap/core/1"),
            ],
            |device: &str| match device {
                "/dev/disk/by-uuid/0b5e" => "/dev/sda1".to_string(),
                "/dev/disk/by-label/snap" => "/dev/loop3".to_string(),
                other => other.to_string(),
            },
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].node, "/dev/sda1");
        assert_eq!(selected[0].partition.device, "/dev/disk/by-uuid/0b5e");
        assert_eq!(selected[0].partition.mountpoint, "/");
    }

    #[tokio::test]
    async fn mapper_device_reads_counters_of_its_kernel_node() {
        let mut source = FakeSource::healthy();
        source.partitions = Some(vec![partition("/dev/mapper/vg-root", "/")]);
        source
            .aliases
            .insert("/dev/mapper/vg-root".to_string(), "/dev/dm-0".to_string());
        let mut step = HashMap::new();
        step.insert(
            "/dev/dm-0".to_string(),
            IoCounters {
                read_bytes: 4096,
                write_bytes: 512,
            },
        );
        source.io_step = Some(step);

        let probed = probe_disk(&source, Some(WINDOW)).await;
        assert!(probed.failures.is_empty(), "{:?}", probed.failures);
        let disk = &probed.value[0];
        assert_eq!(disk.device, "/dev/mapper/vg-root");
        assert!(disk.read_bytes_per_sec.unwrap() > 0);
        assert!(disk.write_bytes_per_sec.unwrap() > 0);
    }

    #[tokio::test]
    async fn duplicate_loop_and_virtual_mounts_are_dropped() {
        let probed = probe_disk(&FakeSource::healthy(), None).await;
        assert!(probed.failures.is_empty(), "{:?}", probed.failures);
        assert_eq!(probed.value.len(), 1);
        let disk = &probed.value[0];
        assert_eq!(disk.device, "/dev/sda1");
        assert_eq!(disk.mountpoint, "/");
        assert_eq!(disk.total_bytes, Some(1000));
        assert_eq!(disk.free_bytes, Some(250));
        assert_eq!(disk.usage_fraction, Some(0.75));
        assert_eq!(disk.read_bytes_per_sec, None);
    }

    #[tokio::test]
    async fn one_failed_usage_read_omits_only_that_device() {
        let mut source = FakeSource::healthy();
        source.partitions = Some(vec![
            partition("/dev/sda1", "/"),
            partition("/dev/sdb1", "/data"),
        ]);
        let probed = probe_disk(&source, None).await;
        assert_eq!(probed.value.len(), 1);
        assert_eq!(probed.value[0].device, "/dev/sda1");
        assert_eq!(probed.failures.len(), 1);
        assert!(probed.failures[0].names("disk[/data]"));
    }

    #[tokio::test]
    async fn enumeration_failure_returns_sentinel() {
        let mut source = FakeSource::healthy();
        source.partitions = None;
        let probed = probe_disk(&source, Some(WINDOW)).await;
        assert_eq!(probed.value, vec![DiskReading::sentinel()]);
        assert_eq!(probed.failures.len(), 1);
        assert!(probed.failures[0].message.contains("mount table"));
    }

    #[tokio::test]
    async fn all_usage_failures_return_sentinel_with_every_failure() {
        let mut source = FakeSource::healthy();
        source.usage.clear();
        source.partitions = Some(vec![
            partition("/dev/sda1", "/"),
            partition("/dev/sdb1", "/data"),
        ]);
        let probed = probe_disk(&source, None).await;
        assert_eq!(probed.value.len(), 1);
        assert!(probed.value[0].is_sentinel());
        assert_eq!(probed.failures.len(), 2);
    }

    #[tokio::test]
    async fn no_physical_devices_is_never_an_empty_list() {
        let mut source = FakeSource::healthy();
        source.partitions = Some(vec![partition("overlay", "/"), partition("tmpfs", "/run")]);
        let probed = probe_disk(&source, None).await;
        assert!(probed.value[0].is_sentinel());
        assert_eq!(probed.failures.len(), 1);
    }

    #[tokio::test]
    async fn io_speeds_are_sampled_across_the_window() {
        let mut source = FakeSource::healthy();
        let mut step = HashMap::new();
        step.insert(
            "/dev/sda1".to_string(),
            IoCounters {
                read_bytes: 4096,
                write_bytes: 0,
            },
        );
        source.io_step = Some(step);
        let probed = probe_disk(&source, Some(WINDOW)).await;
        assert!(probed.failures.is_empty(), "{:?}", probed.failures);
        let disk = &probed.value[0];
        assert!(disk.read_bytes_per_sec.unwrap() > 0);
        assert_eq!(disk.write_bytes_per_sec, Some(0));
    }

    #[tokio::test]
    async fn missing_io_counters_keep_usage() {
        let mut source = FakeSource::healthy();
        source.io_step = None;
        let probed = probe_disk(&source, Some(WINDOW)).await;
        assert_eq!(probed.value[0].usage_fraction, Some(0.75));
        assert_eq!(probed.failures.len(), 1);
        assert!(probed.failures[0].names("disk.read_bytes_per_sec"));

        let mut source = FakeSource::healthy();
        source.io_step = Some(HashMap::new());
        let probed = probe_disk(&source, Some(WINDOW)).await;
        assert_eq!(probed.value[0].read_bytes_per_sec, None);
        assert!(probed.failures[0].names("disk[/].read_bytes_per_sec"));
    }

    #[tokio::test]
    async fn free_space_above_total_is_clamped() {
        let mut source = FakeSource::healthy();
        source.usage.insert(
            "/".to_string(),
            UsageCounters {
                total: 100,
                free: 400,
            },
        );
        let probed = probe_disk(&source, None).await;
        assert_eq!(probed.value[0].free_bytes, Some(100));
        assert_eq!(probed.value[0].usage_fraction, Some(0.0));
    }
}
