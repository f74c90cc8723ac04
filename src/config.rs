use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub interval_secs: u64,
    #[serde(default = "default_render_interval_secs")]
    pub render_interval_secs: u64,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    #[serde(default = "default_thermal_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiskConfig {
    #[serde(default = "default_disk_mount")]
    pub mount: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorBackend {
    Sysfs,
    Dry,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_actuator_label")]
    pub label: String,
    #[serde(default = "default_actuator_backend")]
    pub backend: ActuatorBackend,
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u32,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default)]
    pub active_low: bool,
    #[serde(default = "default_threshold_celsius")]
    pub threshold_celsius: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_terminal")]
    pub terminal: bool,
    #[serde(default = "default_clear_screen")]
    pub clear_screen: bool,
    #[serde(default)]
    pub panel_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            path: default_thermal_path(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            mount: default_disk_mount(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            label: default_actuator_label(),
            backend: default_actuator_backend(),
            gpio_pin: default_gpio_pin(),
            gpio_root: default_gpio_root(),
            active_low: false,
            threshold_celsius: default_threshold_celsius(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            terminal: default_terminal(),
            clear_screen: default_clear_screen(),
            panel_path: None,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs должно быть >= 1".to_string(),
            ));
        }
        if self.render_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "render_interval_secs должно быть >= 1".to_string(),
            ));
        }
        if is_blank(&self.thermal.path) {
            return Err(ConfigError::Validation(
                "thermal.path не должен быть пустым".to_string(),
            ));
        }
        if is_blank(&self.disk.mount) {
            return Err(ConfigError::Validation(
                "disk.mount не должен быть пустым".to_string(),
            ));
        }
        if self.dashboard.poll_interval_ms < 200 {
            return Err(ConfigError::Validation(
                "dashboard.poll_interval_ms должно быть >= 200".to_string(),
            ));
        }

        validate_actuator(&self.actuator)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_actuator(cfg: &ActuatorConfig) -> Result<(), ConfigError> {
    if cfg.label.trim().is_empty() {
        return Err(ConfigError::Validation(
            "actuator.label не должен быть пустым".to_string(),
        ));
    }
    if !cfg.threshold_celsius.is_finite()
        || cfg.threshold_celsius <= 0.0
        || cfg.threshold_celsius > 130.0
    {
        return Err(ConfigError::Validation(
            "actuator.threshold_celsius должно быть в диапазоне (0..130]".to_string(),
        ));
    }
    if cfg.backend == ActuatorBackend::Sysfs && is_blank(&cfg.gpio_root) {
        return Err(ConfigError::Validation(
            "actuator.gpio_root не должен быть пустым для backend sysfs".to_string(),
        ));
    }
    Ok(())
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}

const fn default_render_interval_secs() -> u64 {
    1
}

fn default_thermal_path() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}

fn default_disk_mount() -> PathBuf {
    PathBuf::from("/")
}

fn default_actuator_label() -> String {
    "FAN".to_string()
}

const fn default_actuator_backend() -> ActuatorBackend {
    ActuatorBackend::Sysfs
}

const fn default_gpio_pin() -> u32 {
    17
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

const fn default_threshold_celsius() -> f64 {
    55.0
}

const fn default_terminal() -> bool {
    true
}

const fn default_clear_screen() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    2000
}
