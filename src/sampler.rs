use crate::collectors::HostProbe;
use crate::metrics::Metrics;
use crate::state::{HostReading, StateStore, SystemSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Strictly above the threshold; an unreadable temperature never forces.
pub fn is_forced(temperature_celsius: Option<f64>, threshold_celsius: f64) -> bool {
    temperature_celsius.is_some_and(|t| t > threshold_celsius)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub struct Sampler {
    probe: Box<dyn HostProbe>,
    store: Arc<StateStore>,
    metrics: Arc<Metrics>,
    threshold_celsius: f64,
    seen_pin_errors: u64,
}

impl Sampler {
    pub fn new(
        probe: Box<dyn HostProbe>,
        store: Arc<StateStore>,
        metrics: Arc<Metrics>,
        threshold_celsius: f64,
    ) -> Self {
        Self {
            probe,
            store,
            metrics,
            threshold_celsius,
            seen_pin_errors: 0,
        }
    }

    pub async fn run_cycle(&mut self) -> SystemSnapshot {
        let sample = self.probe.sample();
        for source in &sample.failed_sources {
            self.metrics.inc_sample_error(source);
        }

        let raw = sample.reading;
        // decided on the raw reading, stored rounded
        let forced = is_forced(raw.cpu_temperature_celsius, self.threshold_celsius);
        let reading = HostReading {
            cpu_load_percent: round1(raw.cpu_load_percent),
            cpu_temperature_celsius: raw.cpu_temperature_celsius.map(round1),
            ..raw
        };

        let snapshot = self.store.apply_sample(reading, forced).await;

        let pin_errors = self.store.pin_errors().await;
        self.metrics
            .add_sample_errors("actuator", pin_errors.saturating_sub(self.seen_pin_errors));
        self.seen_pin_errors = pin_errors;

        self.metrics.record_sample(&snapshot);
        debug!(
            cpu = snapshot.cpu_load_percent,
            temperature = ?snapshot.cpu_temperature_celsius,
            forced = snapshot.actuator_forced_on,
            effective = snapshot.actuator_effective_on,
            "sample applied"
        );
        snapshot
    }

    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("получен сигнал остановки цикла опроса");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}
