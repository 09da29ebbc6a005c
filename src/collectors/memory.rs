use super::{log_failure, Failures, MetricSource, Probed};
use crate::snapshot::{FieldFailure, MemoryReading};
use crate::units;

const PHYSICAL_FIELDS: [&str; 4] = [
    "memory.total_bytes",
    "memory.available_bytes",
    "memory.used_bytes",
    "memory.usage_fraction",
];

const SWAP_FIELDS: [&str; 4] = [
    "memory.swap_total_bytes",
    "memory.swap_free_bytes",
    "memory.swap_used_bytes",
    "memory.swap_usage_fraction",
];

/// Physical and swap memory are read separately; each half degrades on its own.
/// Usage fractions are always recomputed from the byte counters reported next to them.
pub fn probe_memory(source: &dyn MetricSource) -> Probed<MemoryReading> {
    let mut reading = MemoryReading::default();
    let mut physical_failure = None;
    let mut swap_failure = None;

    match source.memory() {
        Ok(mem) => {
            let used = mem.used.min(mem.total);
            reading.total_bytes = Some(mem.total);
            reading.available_bytes = Some(mem.available);
            reading.used_bytes = Some(used);
            reading.usage_fraction = units::fraction(used, mem.total);
        }
        Err(err) => physical_failure = Some(err),
    }

    match source.swap() {
        Ok(swap) => {
            let used = swap.used.min(swap.total);
            reading.swap_total_bytes = Some(swap.total);
            reading.swap_free_bytes = Some(swap.free);
            reading.swap_used_bytes = Some(used);
            reading.swap_usage_fraction = units::fraction(used, swap.total);
        }
        Err(err) => swap_failure = Some(err),
    }

    let mut failures = Failures::new();
    match (physical_failure, swap_failure) {
        (Some(physical), Some(swap)) => {
            // both halves gone: one entry for the whole category
            log_failure(&PHYSICAL_FIELDS, &physical);
            log_failure(&SWAP_FIELDS, &swap);
            let mut message = physical.to_string();
            if swap.to_string() != message {
                message = format!("{message}; {swap}");
            }
            failures.push(FieldFailure::new(
                PHYSICAL_FIELDS.iter().chain(SWAP_FIELDS.iter()).copied(),
                message,
            ));
        }
        (Some(physical), None) => failures.record(&PHYSICAL_FIELDS, &physical),
        (None, Some(swap)) => failures.record(&SWAP_FIELDS, &swap),
        (None, None) => {}
    }

    failures.finish(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::fake::FakeSource;
    use crate::collectors::{MemoryCounters, SwapCounters};

    #[test]
    fn fractions_match_reported_bytes() {
        let probed = probe_memory(&FakeSource::healthy());
        assert!(probed.failures.is_empty());
        let mem = probed.value;
        let (used, total) = (mem.used_bytes.unwrap(), mem.total_bytes.unwrap());
        assert!(used <= total);
        assert_eq!(
            mem.usage_fraction,
            Some(units::round(used as f64 / total as f64, 4))
        );
        assert_eq!(mem.swap_usage_fraction, Some(0.25));
    }

    #[test]
    fn used_never_exceeds_total() {
        let mut source = FakeSource::healthy();
        source.memory = Some(MemoryCounters {
            total: 100,
            available: 0,
            used: 150,
        });
        let mem = probe_memory(&source).value;
        assert_eq!(mem.used_bytes, Some(100));
        assert_eq!(mem.usage_fraction, Some(1.0));
    }

    #[test]
    fn no_swap_is_null_fraction_not_failure() {
        let mut source = FakeSource::healthy();
        source.swap = Some(SwapCounters {
            total: 0,
            free: 0,
            used: 0,
        });
        let probed = probe_memory(&source);
        assert!(probed.failures.is_empty());
        assert_eq!(probed.value.swap_total_bytes, Some(0));
        assert_eq!(probed.value.swap_usage_fraction, None);
    }

    #[test]
    fn swap_failure_keeps_physical_half() {
        let mut source = FakeSource::healthy();
        source.swap = None;
        let probed = probe_memory(&source);
        assert_eq!(probed.failures.len(), 1);
        assert!(probed.failures[0].names("memory.swap_total_bytes"));
        assert!(!probed.failures[0].names("memory.total_bytes"));
        assert_eq!(probed.value.total_bytes, Some(16_000));
        assert_eq!(probed.value.swap_total_bytes, None);
    }

    #[test]
    fn total_failure_is_a_single_entry() {
        let mut source = FakeSource::healthy();
        source.memory = None;
        source.swap = None;
        let probed = probe_memory(&source);
        assert_eq!(probed.value, MemoryReading::default());
        assert_eq!(probed.failures.len(), 1);
        assert_eq!(probed.failures[0].affected_fields.len(), 8);
    }
}
