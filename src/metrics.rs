use crate::state::SystemSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub pimon_cpu_load_percent: Gauge,
    pub pimon_cpu_temperature_celsius: Gauge,
    pub pimon_cpu_temperature_available: Gauge,
    pub pimon_memory_used_bytes: Gauge,
    pub pimon_memory_total_bytes: Gauge,
    pub pimon_disk_used_bytes: Gauge,
    pub pimon_disk_total_bytes: Gauge,
    pub pimon_actuator_commanded_on: Gauge,
    pub pimon_actuator_forced_on: Gauge,
    pub pimon_actuator_effective_on: Gauge,
    pub pimon_actuator_threshold_celsius: Gauge,
    pub pimon_uptime_seconds: Gauge,
    pub pimon_last_sample_timestamp_seconds: Gauge,
    pub pimon_scrape_count_total: Counter,
    pub pimon_samples_total: Counter,
    pub pimon_sample_errors_total: CounterVec,
    pub pimon_render_errors_total: CounterVec,
    pub pimon_commands_total: CounterVec,
}

impl Metrics {
    pub fn new(threshold_celsius: f64) -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let pimon_cpu_load_percent = Gauge::with_opts(opts!(
            "pimon_cpu_load_percent",
            "Average CPU load across cores in percent (0..100)"
        ))?;
        let pimon_cpu_temperature_celsius = Gauge::with_opts(opts!(
            "pimon_cpu_temperature_celsius",
            "Last readable CPU temperature in Celsius"
        ))?;
        let pimon_cpu_temperature_available = Gauge::with_opts(opts!(
            "pimon_cpu_temperature_available",
            "1 if the last temperature read succeeded, 0 otherwise"
        ))?;
        let pimon_memory_used_bytes =
            Gauge::with_opts(opts!("pimon_memory_used_bytes", "Used memory in bytes"))?;
        let pimon_memory_total_bytes =
            Gauge::with_opts(opts!("pimon_memory_total_bytes", "Total memory in bytes"))?;
        let pimon_disk_used_bytes = Gauge::with_opts(opts!(
            "pimon_disk_used_bytes",
            "Used bytes on the monitored filesystem"
        ))?;
        let pimon_disk_total_bytes = Gauge::with_opts(opts!(
            "pimon_disk_total_bytes",
            "Total bytes on the monitored filesystem"
        ))?;
        let pimon_actuator_commanded_on = Gauge::with_opts(opts!(
            "pimon_actuator_commanded_on",
            "Last manually commanded actuator state (1 = on)"
        ))?;
        let pimon_actuator_forced_on = Gauge::with_opts(opts!(
            "pimon_actuator_forced_on",
            "1 while the temperature is above the forcing threshold"
        ))?;
        let pimon_actuator_effective_on = Gauge::with_opts(opts!(
            "pimon_actuator_effective_on",
            "Actuator state applied to the output line (1 = on)"
        ))?;
        let pimon_actuator_threshold_celsius = Gauge::with_opts(opts!(
            "pimon_actuator_threshold_celsius",
            "Temperature above which the actuator is forced on"
        ))?;
        let pimon_uptime_seconds =
            Gauge::with_opts(opts!("pimon_uptime_seconds", "Daemon uptime in seconds"))?;
        let pimon_last_sample_timestamp_seconds = Gauge::with_opts(opts!(
            "pimon_last_sample_timestamp_seconds",
            "Unix time of the last sampler cycle"
        ))?;
        let pimon_scrape_count_total = Counter::with_opts(opts!(
            "pimon_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let pimon_samples_total = Counter::with_opts(opts!(
            "pimon_samples_total",
            "Number of completed sampler cycles"
        ))?;
        let pimon_sample_errors_total = CounterVec::new(
            opts!(
                "pimon_sample_errors_total",
                "Sampler read or write failures by source"
            ),
            &["source"],
        )?;
        let pimon_render_errors_total = CounterVec::new(
            opts!("pimon_render_errors_total", "Render failures by sink"),
            &["sink"],
        )?;
        let pimon_commands_total = CounterVec::new(
            opts!("pimon_commands_total", "Actuator commands by result"),
            &["result"],
        )?;

        register(&registry, &pimon_cpu_load_percent)?;
        register(&registry, &pimon_cpu_temperature_celsius)?;
        register(&registry, &pimon_cpu_temperature_available)?;
        register(&registry, &pimon_memory_used_bytes)?;
        register(&registry, &pimon_memory_total_bytes)?;
        register(&registry, &pimon_disk_used_bytes)?;
        register(&registry, &pimon_disk_total_bytes)?;
        register(&registry, &pimon_actuator_commanded_on)?;
        register(&registry, &pimon_actuator_forced_on)?;
        register(&registry, &pimon_actuator_effective_on)?;
        register(&registry, &pimon_actuator_threshold_celsius)?;
        register(&registry, &pimon_uptime_seconds)?;
        register(&registry, &pimon_last_sample_timestamp_seconds)?;
        register(&registry, &pimon_scrape_count_total)?;
        register(&registry, &pimon_samples_total)?;
        register(&registry, &pimon_sample_errors_total)?;
        register(&registry, &pimon_render_errors_total)?;
        register(&registry, &pimon_commands_total)?;

        pimon_actuator_threshold_celsius.set(threshold_celsius);

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            pimon_cpu_load_percent,
            pimon_cpu_temperature_celsius,
            pimon_cpu_temperature_available,
            pimon_memory_used_bytes,
            pimon_memory_total_bytes,
            pimon_disk_used_bytes,
            pimon_disk_total_bytes,
            pimon_actuator_commanded_on,
            pimon_actuator_forced_on,
            pimon_actuator_effective_on,
            pimon_actuator_threshold_celsius,
            pimon_uptime_seconds,
            pimon_last_sample_timestamp_seconds,
            pimon_scrape_count_total,
            pimon_samples_total,
            pimon_sample_errors_total,
            pimon_render_errors_total,
            pimon_commands_total,
        }))
    }

    pub fn update_from_snapshot(&self, snap: &SystemSnapshot) {
        self.pimon_cpu_load_percent.set(snap.cpu_load_percent);
        match snap.cpu_temperature_celsius {
            Some(t) => {
                self.pimon_cpu_temperature_celsius.set(t);
                self.pimon_cpu_temperature_available.set(1.0);
            }
            None => self.pimon_cpu_temperature_available.set(0.0),
        }
        self.pimon_memory_used_bytes
            .set(snap.memory_used_bytes as f64);
        self.pimon_memory_total_bytes
            .set(snap.memory_total_bytes as f64);
        self.pimon_disk_used_bytes.set(snap.disk_used_bytes as f64);
        self.pimon_disk_total_bytes
            .set(snap.disk_total_bytes as f64);
        self.pimon_actuator_commanded_on
            .set(flag(snap.actuator_commanded_on));
        self.pimon_actuator_forced_on
            .set(flag(snap.actuator_forced_on));
        self.pimon_actuator_effective_on
            .set(flag(snap.actuator_effective_on));
    }

    pub fn record_sample(&self, snap: &SystemSnapshot) {
        self.update_from_snapshot(snap);
        self.pimon_samples_total.inc();
        self.pimon_last_sample_timestamp_seconds
            .set(now_unix() as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.pimon_scrape_count_total.inc();
    }

    pub fn inc_sample_error(&self, source: &str) {
        self.pimon_sample_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn add_sample_errors(&self, source: &str, count: u64) {
        if count > 0 {
            self.pimon_sample_errors_total
                .with_label_values(&[source])
                .inc_by(count as f64);
        }
    }

    pub fn inc_render_error(&self, sink: &str) {
        self.pimon_render_errors_total
            .with_label_values(&[sink])
            .inc();
    }

    pub fn inc_command(&self, result: &str) {
        self.pimon_commands_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.pimon_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_reflected_in_exposition() {
        let metrics = Metrics::new(55.0).expect("инициализация метрик");
        metrics.record_sample(&SystemSnapshot {
            cpu_load_percent: 33.3,
            cpu_temperature_celsius: Some(61.2),
            actuator_forced_on: true,
            actuator_effective_on: true,
            ..SystemSnapshot::default()
        });
        metrics.inc_render_error("panel");

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("pimon_cpu_load_percent 33.3"));
        assert!(text.contains("pimon_cpu_temperature_celsius 61.2"));
        assert!(text.contains("pimon_actuator_effective_on 1"));
        assert!(text.contains("pimon_actuator_threshold_celsius 55"));
        assert!(text.contains("pimon_samples_total 1"));
        assert!(text.contains("pimon_render_errors_total{sink=\"panel\"} 1"));
    }

    #[test]
    fn absent_temperature_clears_availability() {
        let metrics = Metrics::new(55.0).unwrap();
        metrics.update_from_snapshot(&SystemSnapshot {
            cpu_temperature_celsius: Some(40.0),
            ..SystemSnapshot::default()
        });
        assert_eq!(metrics.pimon_cpu_temperature_available.get(), 1.0);

        metrics.update_from_snapshot(&SystemSnapshot::default());
        assert_eq!(metrics.pimon_cpu_temperature_available.get(), 0.0);
        assert_eq!(metrics.pimon_cpu_temperature_celsius.get(), 40.0);
    }
}
