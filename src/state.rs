use crate::actuator::OutputPin;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The single shared record of the latest sample and actuator states.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SystemSnapshot {
    pub cpu_load_percent: f64,
    pub cpu_temperature_celsius: Option<f64>,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub actuator_commanded_on: bool,
    pub actuator_forced_on: bool,
    pub actuator_effective_on: bool,
}

/// Host readings for one Sampler cycle, everything the store overwrites
/// except the actuator fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReading {
    pub cpu_load_percent: f64,
    pub cpu_temperature_celsius: Option<f64>,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
}

impl SystemSnapshot {
    fn refresh_effective(&mut self) {
        self.actuator_effective_on = self.actuator_forced_on || self.actuator_commanded_on;
    }

    pub fn memory_used_percent(&self) -> f64 {
        percent(self.memory_used_bytes, self.memory_total_bytes)
    }

    pub fn disk_used_percent(&self) -> f64 {
        percent(self.disk_used_bytes, self.disk_total_bytes)
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

struct Inner {
    snapshot: SystemSnapshot,
    // None once released; mutations after that no longer touch hardware.
    output: Option<Box<dyn OutputPin>>,
    pin_errors: u64,
}

/// Owns the snapshot and the actuator output behind one lock. Every pin
/// write happens in the same critical section as the update it reflects.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new(output: Box<dyn OutputPin>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot: SystemSnapshot::default(),
                output: Some(output),
                pin_errors: 0,
            }),
        }
    }

    pub async fn read(&self) -> SystemSnapshot {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn pin_errors(&self) -> u64 {
        self.inner.lock().await.pin_errors
    }

    /// Sampler entry point.
    pub async fn apply_sample(&self, reading: HostReading, forced_on: bool) -> SystemSnapshot {
        let mut guard = self.inner.lock().await;
        let was_on = guard.snapshot.actuator_effective_on;
        let snap = &mut guard.snapshot;
        snap.cpu_load_percent = reading.cpu_load_percent;
        snap.cpu_temperature_celsius = reading.cpu_temperature_celsius;
        snap.memory_used_bytes = reading.memory_used_bytes;
        snap.memory_total_bytes = reading.memory_total_bytes;
        snap.disk_used_bytes = reading.disk_used_bytes;
        snap.disk_total_bytes = reading.disk_total_bytes;
        snap.actuator_forced_on = forced_on;
        snap.refresh_effective();

        let now_on = snap.actuator_effective_on;
        if now_on != was_on {
            info!(
                on = now_on,
                forced = forced_on,
                temperature = ?reading.cpu_temperature_celsius,
                "actuator state changed by sampler"
            );
        }
        guard.drive();
        guard.snapshot.clone()
    }

    /// Command-surface entry point. Applies immediately; the next sample
    /// still has the final say on forcing.
    pub async fn set_commanded(&self, on: bool) -> SystemSnapshot {
        let mut guard = self.inner.lock().await;
        let was_on = guard.snapshot.actuator_effective_on;
        guard.snapshot.actuator_commanded_on = on;
        guard.snapshot.refresh_effective();
        if guard.snapshot.actuator_effective_on != was_on {
            info!(
                on = guard.snapshot.actuator_effective_on,
                "actuator state changed by command"
            );
        }
        guard.drive();
        guard.snapshot.clone()
    }

    /// Drives the output to its safe (off) level and releases the handle.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut output) = guard.output.take() {
            if let Err(err) = output.set(false) {
                warn!(error = %err, "не удалось выключить исполнительное устройство");
            }
            drop(output);
            info!("исполнительное устройство переведено в безопасное состояние");
        }
    }
}

impl Inner {
    fn drive(&mut self) {
        let on = self.snapshot.actuator_effective_on;
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if let Err(err) = output.set(on) {
            self.pin_errors = self.pin_errors.saturating_add(1);
            warn!(error = %err, on, "failed to drive actuator output");
        }
    }
}
