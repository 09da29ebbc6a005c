use crate::snapshot::{FieldFailure, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Agent self-metrics plus gauges mirroring the most recent snapshot.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub agent_collections_total: Counter,
    pub agent_field_failures_total: CounterVec,
    pub agent_last_collect_duration_seconds: Gauge,
    pub agent_last_collect_timestamp_seconds: Gauge,
    pub agent_scrape_count_total: Counter,
    pub agent_uptime_seconds: Gauge,
    pub host_cpu_usage_ratio: Gauge,
    pub host_memory_usage_ratio: Gauge,
    pub host_swap_usage_ratio: Gauge,
    pub host_disk_usage_ratio: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_collections_total = Counter::with_opts(opts!(
            "agent_collections_total",
            "Completed snapshot collections"
        ))?;
        let agent_field_failures_total = CounterVec::new(
            opts!(
                "agent_field_failures_total",
                "Field failures reported by collections, by probe category"
            ),
            &["probe"],
        )?;
        let agent_last_collect_duration_seconds = Gauge::with_opts(opts!(
            "agent_last_collect_duration_seconds",
            "Wall time of the last collection including sampling windows"
        ))?;
        let agent_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_collect_timestamp_seconds",
            "Unix time the last collection finished"
        ))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Scrapes of the /metrics endpoint"
        ))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Seconds since the agent started"))?;
        let host_cpu_usage_ratio = Gauge::with_opts(opts!(
            "host_cpu_usage_ratio",
            "CPU usage fraction from the last collection (0..1)"
        ))?;
        let host_memory_usage_ratio = Gauge::with_opts(opts!(
            "host_memory_usage_ratio",
            "Physical memory usage fraction from the last collection (0..1)"
        ))?;
        let host_swap_usage_ratio = Gauge::with_opts(opts!(
            "host_swap_usage_ratio",
            "Swap usage fraction from the last collection (0..1)"
        ))?;
        let host_disk_usage_ratio = GaugeVec::new(
            opts!(
                "host_disk_usage_ratio",
                "Disk usage fraction by device from the last collection (0..1)"
            ),
            &["device", "mountpoint"],
        )?;

        register(&registry, &agent_collections_total)?;
        register(&registry, &agent_field_failures_total)?;
        register(&registry, &agent_last_collect_duration_seconds)?;
        register(&registry, &agent_last_collect_timestamp_seconds)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &host_cpu_usage_ratio)?;
        register(&registry, &host_memory_usage_ratio)?;
        register(&registry, &host_swap_usage_ratio)?;
        register(&registry, &host_disk_usage_ratio)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            agent_collections_total,
            agent_field_failures_total,
            agent_last_collect_duration_seconds,
            agent_last_collect_timestamp_seconds,
            agent_scrape_count_total,
            agent_uptime_seconds,
            host_cpu_usage_ratio,
            host_memory_usage_ratio,
            host_swap_usage_ratio,
            host_disk_usage_ratio,
        }))
    }

    /// Called after every full collection, whoever asked for it.
    pub fn update_from_snapshot(
        &self,
        snapshot: &Snapshot,
        failures: &[FieldFailure],
        took: Duration,
    ) {
        self.agent_collections_total.inc();
        for failure in failures {
            self.agent_field_failures_total
                .with_label_values(&[failure.category()])
                .inc();
        }
        self.agent_last_collect_duration_seconds
            .set(took.as_secs_f64());
        self.agent_last_collect_timestamp_seconds
            .set(now_unix() as f64);

        self.host_cpu_usage_ratio.set(snapshot.cpu.usage_fraction);
        // a failed reading clears the gauge rather than leaving a stale value
        self.host_memory_usage_ratio
            .set(snapshot.memory.usage_fraction.unwrap_or(f64::NAN));
        self.host_swap_usage_ratio
            .set(snapshot.memory.swap_usage_fraction.unwrap_or(f64::NAN));

        self.host_disk_usage_ratio.reset();
        for d in snapshot.disk.iter().filter(|d| !d.is_sentinel()) {
            if let Some(fraction) = d.usage_fraction {
                self.host_disk_usage_ratio
                    .with_label_values(&[&d.device, &d.mountpoint])
                    .set(fraction);
            }
        }
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.agent_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64().floor());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
