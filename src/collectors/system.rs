use crate::collectors::{thermal, HostProbe, ProbeSample};
use crate::state::HostReading;
use std::path::{Path, PathBuf};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

/// Host probe backed by sysinfo plus a sysfs thermal zone.
pub struct SysinfoProbe {
    system: System,
    thermal_path: PathBuf,
    disk_mount: PathBuf,
}

impl SysinfoProbe {
    pub fn new(thermal_path: PathBuf, disk_mount: PathBuf) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_disks_list();
        Self {
            system,
            thermal_path,
            disk_mount,
        }
    }
}

impl HostProbe for SysinfoProbe {
    fn sample(&mut self) -> ProbeSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks();

        let mut failed_sources = Vec::new();

        let cpu_load_percent = cpu_usage_percent(&self.system);

        let cpu_temperature_celsius = match thermal::read_celsius(&self.thermal_path) {
            Ok(t) => Some(t),
            Err(err) => {
                debug!(error = %err, "температура недоступна");
                failed_sources.push("thermal");
                None
            }
        };

        let (disk_used_bytes, disk_total_bytes) =
            match disk_usage(&self.system, &self.disk_mount) {
                Some(usage) => usage,
                None => {
                    debug!(mount = %self.disk_mount.display(), "disk mount not found");
                    failed_sources.push("disk");
                    (0, 0)
                }
            };

        ProbeSample {
            reading: HostReading {
                cpu_load_percent,
                cpu_temperature_celsius,
                memory_used_bytes: self.system.used_memory(),
                memory_total_bytes: self.system.total_memory(),
                disk_used_bytes,
                disk_total_bytes,
            },
            failed_sources,
        }
    }
}

fn cpu_usage_percent(system: &System) -> f64 {
    if system.cpus().is_empty() {
        return 0.0;
    }
    let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
    let avg = (sum / system.cpus().len() as f32) as f64;
    avg.clamp(0.0, 100.0)
}

fn disk_usage(system: &System, mount: &Path) -> Option<(u64, u64)> {
    system
        .disks()
        .iter()
        .find(|d| d.mount_point() == mount)
        .map(|d| {
            let total = d.total_space();
            (total.saturating_sub(d.available_space()), total)
        })
}
