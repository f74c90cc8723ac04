use crate::config::{ActuatorBackend, ActuatorConfig};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const EXPORT_WAIT_STEP: Duration = Duration::from_millis(50);
const EXPORT_WAIT_STEPS: u32 = 20;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("ошибка записи в {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("узел GPIO {path} не появился за {waited_ms} мс")]
    Timeout { path: String, waited_ms: u64 },
}

/// A single binary output line. `on` is the logical state; polarity is the
/// implementation's concern.
pub trait OutputPin: Send {
    fn set(&mut self, on: bool) -> Result<(), GpioError>;
}

pub fn open_output(cfg: &ActuatorConfig) -> Result<Box<dyn OutputPin>, GpioError> {
    match cfg.backend {
        ActuatorBackend::Sysfs => {
            let pin = SysfsPin::open(&cfg.gpio_root, cfg.gpio_pin, cfg.active_low)?;
            Ok(Box::new(pin))
        }
        ActuatorBackend::Dry => Ok(Box::new(DryPin::new(cfg.gpio_pin))),
    }
}

/// Output line driven through the legacy `/sys/class/gpio` interface.
///
/// The line is configured as an output at its off level on open. On drop it
/// is driven off again and, if this process exported it, unexported.
pub struct SysfsPin {
    pin: u32,
    root: PathBuf,
    value_path: PathBuf,
    active_low: bool,
    exported_by_us: bool,
}

impl SysfsPin {
    pub fn open(root: &Path, pin: u32, active_low: bool) -> Result<Self, GpioError> {
        let pin_dir = root.join(format!("gpio{pin}"));
        let exported_by_us = if pin_dir.exists() {
            false
        } else {
            write_sysfs(&root.join("export"), &pin.to_string())?;
            true
        };

        let direction_path = pin_dir.join("direction");
        wait_for_node(&direction_path)?;

        // "low"/"high" switch to output with the given initial level in one write.
        let off_level = if active_low { "high" } else { "low" };
        write_sysfs(&direction_path, off_level)?;

        info!(pin, active_low, exported_by_us, "GPIO-линия настроена как выход");
        Ok(Self {
            pin,
            root: root.to_path_buf(),
            value_path: pin_dir.join("value"),
            active_low,
            exported_by_us,
        })
    }

    fn level(&self, on: bool) -> &'static str {
        if on != self.active_low {
            "1"
        } else {
            "0"
        }
    }
}

impl OutputPin for SysfsPin {
    fn set(&mut self, on: bool) -> Result<(), GpioError> {
        write_sysfs(&self.value_path, self.level(on))
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if let Err(err) = write_sysfs(&self.value_path, self.level(false)) {
            warn!(pin = self.pin, error = %err, "failed to drive pin off on release");
        }
        if self.exported_by_us {
            if let Err(err) = write_sysfs(&self.root.join("unexport"), &self.pin.to_string()) {
                warn!(pin = self.pin, error = %err, "failed to unexport pin");
            }
        }
        debug!(pin = self.pin, "GPIO-линия освобождена");
    }
}

/// Stand-in for hosts without GPIO: logs every transition.
pub struct DryPin {
    pin: u32,
    last: Option<bool>,
}

impl DryPin {
    pub fn new(pin: u32) -> Self {
        Self { pin, last: None }
    }
}

impl OutputPin for DryPin {
    fn set(&mut self, on: bool) -> Result<(), GpioError> {
        if self.last != Some(on) {
            info!(pin = self.pin, on, "dry-run: actuator output changed");
            self.last = Some(on);
        }
        Ok(())
    }
}

fn write_sysfs(path: &Path, value: &str) -> Result<(), GpioError> {
    fs::write(path, value).map_err(|source| GpioError::Io {
        path: path.display().to_string(),
        source,
    })
}

// udev may need a moment after export before the node is writable.
fn wait_for_node(path: &Path) -> Result<(), GpioError> {
    for _ in 0..EXPORT_WAIT_STEPS {
        match fs::OpenOptions::new().write(true).open(path) {
            Ok(_) => return Ok(()),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                std::thread::sleep(EXPORT_WAIT_STEP);
            }
            Err(source) => {
                return Err(GpioError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
    }
    Err(GpioError::Timeout {
        path: path.display().to_string(),
        waited_ms: EXPORT_WAIT_STEP.as_millis() as u64 * u64::from(EXPORT_WAIT_STEPS),
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every level written, in order.
    #[derive(Clone, Default)]
    pub struct RecordingPin {
        pub writes: Arc<Mutex<Vec<bool>>>,
    }

    impl RecordingPin {
        pub fn writes(&self) -> Vec<bool> {
            self.writes.lock().unwrap().clone()
        }

        pub fn last(&self) -> Option<bool> {
            self.writes.lock().unwrap().last().copied()
        }
    }

    impl OutputPin for RecordingPin {
        fn set(&mut self, on: bool) -> Result<(), GpioError> {
            self.writes.lock().unwrap().push(on);
            Ok(())
        }
    }

    pub struct FailingPin;

    impl OutputPin for FailingPin {
        fn set(&mut self, _on: bool) -> Result<(), GpioError> {
            Err(GpioError::Io {
                path: "/sys/class/gpio/gpio17/value".to_string(),
                source: std::io::Error::new(ErrorKind::Other, "device busy"),
            })
        }
    }
}
