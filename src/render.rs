use crate::metrics::Metrics;
use crate::state::{StateStore, SystemSnapshot};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("ошибка вывода в {target}: {source}")]
    Io {
        target: String,
        source: std::io::Error,
    },
}

/// A write-only, best-effort presentation target.
pub trait Sink: Send {
    fn name(&self) -> &'static str;
    fn render(&mut self, snap: &SystemSnapshot, at: SystemTime) -> Result<(), SinkError>;
    fn clear(&mut self) -> Result<(), SinkError>;
}

fn actuator_line(snap: &SystemSnapshot, label: &str) -> String {
    let title = title_case(label);
    if !snap.actuator_effective_on {
        format!("{title}: {label} OFF (Manual)")
    } else if snap.actuator_forced_on {
        format!("{title}: {label} ON (AUTO override)")
    } else {
        format!("{title}: {label} ON (Manual)")
    }
}

fn title_case(label: &str) -> String {
    let lower = label.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn terminal_report(snap: &SystemSnapshot, label: &str, at: SystemTime) -> String {
    let temp = match snap.cpu_temperature_celsius {
        Some(t) => format!("CPU Temp: {t:.1}°C"),
        None => "CPU Temp: Not Available".to_string(),
    };
    [
        "======= RASPBERRY PI SYSTEM MONITOR =======".to_string(),
        format!("CPU Usage: {:.1}%", snap.cpu_load_percent),
        temp,
        format!(
            "RAM: {:.1}% ({} MB / {} MB)",
            snap.memory_used_percent(),
            snap.memory_used_bytes / MIB,
            snap.memory_total_bytes / MIB
        ),
        format!(
            "Disk: {:.1}% ({} GB / {} GB)",
            snap.disk_used_percent(),
            snap.disk_used_bytes / GIB,
            snap.disk_total_bytes / GIB
        ),
        actuator_line(snap, label),
        format!("Updated: {}", humantime::format_rfc3339_seconds(at)),
        "============================================".to_string(),
    ]
    .join("\n")
}

/// Five rows for a 128x64 panel, drawn at y = 0, 12, 24, 36, 48.
pub fn panel_lines(snap: &SystemSnapshot, label: &str) -> [String; 5] {
    let temp = match snap.cpu_temperature_celsius {
        Some(t) => format!("Temp: {t:.1}C"),
        None => "Temp: NA".to_string(),
    };
    let actuator = match (snap.actuator_effective_on, snap.actuator_forced_on) {
        (true, true) => format!("{label} ON (AUTO)"),
        (true, false) => format!("{label} ON"),
        (false, _) => format!("{label} OFF"),
    };
    [
        format!("CPU: {:.1}%", snap.cpu_load_percent),
        temp,
        format!(
            "RAM: {}/{}MB",
            snap.memory_used_bytes / MIB,
            snap.memory_total_bytes / MIB
        ),
        format!(
            "Disk: {}/{}GB",
            snap.disk_used_bytes / GIB,
            snap.disk_total_bytes / GIB
        ),
        actuator,
    ]
}

pub struct TerminalSink<W: Write + Send> {
    out: W,
    label: String,
    clear_screen: bool,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, label: String, clear_screen: bool) -> Self {
        Self {
            out,
            label,
            clear_screen,
        }
    }

    fn io_err(source: std::io::Error) -> SinkError {
        SinkError::Io {
            target: "terminal".to_string(),
            source,
        }
    }
}

impl<W: Write + Send> Sink for TerminalSink<W> {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn render(&mut self, snap: &SystemSnapshot, at: SystemTime) -> Result<(), SinkError> {
        if self.clear_screen {
            self.out
                .write_all(CLEAR_SCREEN.as_bytes())
                .map_err(Self::io_err)?;
        }
        writeln!(self.out, "{}", terminal_report(snap, &self.label, at)).map_err(Self::io_err)?;
        self.out.flush().map_err(Self::io_err)
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.out.flush().map_err(Self::io_err)
    }
}

/// Hands the panel layout to an external display driver through a file,
/// replaced atomically on every frame.
pub struct PanelSink {
    path: PathBuf,
    tmp_path: PathBuf,
    label: String,
}

impl PanelSink {
    /// Fails if the target cannot be written, so a missing display aborts
    /// startup rather than the first frame.
    pub fn open(path: &Path, label: String) -> Result<Self, SinkError> {
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let mut sink = Self {
            path: path.to_path_buf(),
            tmp_path: path.with_file_name(tmp_name),
            label,
        };
        sink.clear()?;
        Ok(sink)
    }

    fn write_atomic(&self, contents: &str) -> Result<(), SinkError> {
        fs::write(&self.tmp_path, contents)
            .and_then(|_| fs::rename(&self.tmp_path, &self.path))
            .map_err(|source| SinkError::Io {
                target: self.path.display().to_string(),
                source,
            })
    }
}

impl Sink for PanelSink {
    fn name(&self) -> &'static str {
        "panel"
    }

    fn render(&mut self, snap: &SystemSnapshot, _at: SystemTime) -> Result<(), SinkError> {
        let mut text = panel_lines(snap, &self.label).join("\n");
        text.push('\n');
        self.write_atomic(&text)
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.write_atomic("")
    }
}

pub async fn render_all(sinks: &mut [Box<dyn Sink>], store: &StateStore, metrics: &Metrics) {
    let snap = store.read().await;
    let now = SystemTime::now();
    for sink in sinks.iter_mut() {
        if let Err(err) = sink.render(&snap, now) {
            metrics.inc_render_error(sink.name());
            warn!(sink = sink.name(), error = %err, "render failed");
        }
    }
}

pub fn clear_all(sinks: &mut [Box<dyn Sink>]) {
    for sink in sinks.iter_mut() {
        if let Err(err) = sink.clear() {
            warn!(sink = sink.name(), error = %err, "не удалось очистить вывод");
        }
    }
}

/// Renders on its own period until shutdown and hands the sinks back so
/// the caller decides when to clear them.
pub async fn run_renderer(
    mut sinks: Vec<Box<dyn Sink>>,
    store: Arc<StateStore>,
    metrics: Arc<Metrics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Vec<Box<dyn Sink>> {
    if sinks.is_empty() {
        info!("нет настроенных выводов, отрисовка отключена");
        let _ = shutdown.changed().await;
        return sinks;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                render_all(&mut sinks, &store, &metrics).await;
            }
        }
    }
    sinks
}
