use super::{Failures, MetricSource, Probed};
use crate::snapshot::HostReading;

const HOST_FIELDS: [&str; 6] = [
    "host.os",
    "host.platform",
    "host.kernel_version",
    "host.hostname",
    "host.uptime_seconds",
    "host.virtualization",
];

/// Host identity comes from a single OS call: all fields or the sentinel.
pub fn probe_host(source: &dyn MetricSource) -> Probed<HostReading> {
    let mut failures = Failures::new();
    let reading = match source.host_identity() {
        Ok(id) => HostReading {
            hostname: id.hostname,
            os: id.os,
            platform: id.platform,
            kernel_version: id.kernel_version,
            uptime_seconds: id.uptime_seconds,
            virtualization: id.virtualization,
        },
        Err(err) => {
            failures.record(&HOST_FIELDS, &err);
            HostReading::sentinel()
        }
    };
    failures.finish(reading)
}
