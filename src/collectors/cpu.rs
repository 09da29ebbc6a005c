use super::{CpuTimes, Failures, MetricSource, ProbeError, Probed};
use crate::snapshot::CpuReading;
use crate::units;
use std::time::Duration;

const USAGE_FIELDS: [&str; 2] = ["cpu.usage_fraction", "cpu.free_fraction"];

/// Reads every CPU sub-reading independently. Usage is the busy share of CPU
/// time elapsed across `window`, so this blocks for at least that long.
pub async fn probe_cpu(source: &dyn MetricSource, window: Duration) -> Probed<CpuReading> {
    let mut failures = Failures::new();

    let usage = sample_usage(source, window).await;
    let usage_fraction = failures.take_or(usage, &USAGE_FIELDS, 0.0);
    let free_fraction = units::round(1.0 - usage_fraction, 4);

    let physical_cores = failures.take_or(source.physical_cores(), &["cpu.physical_cores"], 0);
    let logical_cores = failures.take_or(source.logical_cores(), &["cpu.logical_cores"], 0);
    let nominal_frequency_mhz = failures.take_or(
        source.nominal_frequency_mhz(),
        &["cpu.nominal_frequency_mhz"],
        0,
    );
    let current_frequency_mhz = failures.take_or(
        source.current_frequency_mhz(),
        &["cpu.current_frequency_mhz"],
        0,
    );
    let temperatures =
        failures.take_or(source.cpu_temperatures(), &["cpu.temperatures"], Vec::new());

    failures.finish(CpuReading {
        physical_cores,
        logical_cores,
        nominal_frequency_mhz,
        current_frequency_mhz,
        temperatures,
        free_fraction,
        usage_fraction,
    })
}

async fn sample_usage(source: &dyn MetricSource, window: Duration) -> Result<f64, ProbeError> {
    let start = source.cpu_times()?;
    tokio::time::sleep(window).await;
    let end = source.cpu_times()?;
    usage_between(start, end).ok_or_else(|| {
        ProbeError::unavailable("CPU time delta (no ticks elapsed during the sampling window)")
    })
}

/// Busy share of the ticks elapsed between two samples, clamped to `[0, 1]`.
/// A counter that went backwards yields no elapsed time rather than a bogus ratio.
pub fn usage_between(start: CpuTimes, end: CpuTimes) -> Option<f64> {
    let elapsed = end.total.saturating_sub(start.total);
    let busy = end.busy.saturating_sub(start.busy);
    units::fraction(busy, elapsed)
}
