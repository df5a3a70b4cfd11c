use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const MIN_INTERVAL_MS: u64 = 250;
pub const MAX_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSettings {
    pub command_path: String,
    pub command_timeout_ms: u64,
    pub max_concurrent_commands: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command_path: String::new(),
            command_timeout_ms: 10_000,
            max_concurrent_commands: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogcatSettings {
    pub max_lines: usize,
    pub default_filters: Vec<String>,
}

impl Default for LogcatSettings {
    fn default() -> Self {
        Self {
            max_lines: 1000,
            default_filters: default_logcat_filters(),
        }
    }
}

fn default_logcat_filters() -> Vec<String> {
    [
        "ReactNativeJS:V",
        "ReactNative:V",
        "AndroidRuntime:E",
        "System.err:W",
        "*:S",
    ]
    .iter()
    .map(|spec| spec.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorSettings {
    pub memory_interval_ms: u64,
    pub cpu_interval_ms: u64,
    pub fps_interval_ms: u64,
    pub battery_interval_ms: u64,
    pub gc_interval_ms: u64,
    pub network_interval_ms: u64,
    /// Wait between `gfxinfo reset` and `gfxinfo framestats` so frames can accumulate.
    pub fps_settle_delay_ms: u64,
    /// Number of trailing log lines dumped per GC tick.
    pub gc_log_window: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            memory_interval_ms: 1000,
            cpu_interval_ms: 1000,
            fps_interval_ms: 1000,
            battery_interval_ms: 5000,
            gc_interval_ms: 2000,
            network_interval_ms: 2000,
            fps_settle_delay_ms: 100,
            gc_log_window: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub logcat: LogcatSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DROID_TELEMETRY_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".droid_telemetry_config.json")
}

fn backup_path_for(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config() -> Result<TelemetryConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &TelemetryConfig) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_path_for(&path))
}

pub fn load_config_from_path(path: &Path) -> Result<TelemetryConfig, AppError> {
    if !path.exists() {
        return Ok(TelemetryConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: TelemetryConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &TelemetryConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

pub fn clamp_interval_ms(value: u64) -> u64 {
    value.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

pub fn validate_config(mut config: TelemetryConfig) -> TelemetryConfig {
    if config.bridge.command_timeout_ms < 500 {
        config.bridge.command_timeout_ms = 10_000;
    }
    if config.bridge.max_concurrent_commands == 0 {
        config.bridge.max_concurrent_commands = 4;
    }
    if config.logcat.max_lines < 100 {
        config.logcat.max_lines = 1000;
    }
    config
        .logcat
        .default_filters
        .retain(|spec| !spec.trim().is_empty());
    if config.logcat.default_filters.is_empty() {
        config.logcat.default_filters = default_logcat_filters();
    }

    let monitor = &mut config.monitor;
    for interval in [
        &mut monitor.memory_interval_ms,
        &mut monitor.cpu_interval_ms,
        &mut monitor.fps_interval_ms,
        &mut monitor.battery_interval_ms,
        &mut monitor.gc_interval_ms,
        &mut monitor.network_interval_ms,
    ] {
        *interval = clamp_interval_ms(*interval);
    }
    if monitor.fps_settle_delay_ms > 5_000 {
        monitor.fps_settle_delay_ms = 100;
    }
    if monitor.gc_log_window == 0 {
        monitor.gc_log_window = 500;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json")).expect("config");
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.monitor.fps_settle_delay_ms, 100);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "bridge": { "command_path": "/opt/adb", "command_timeout_ms": 3000, "max_concurrent_commands": 2 } }"#)
            .expect("write");
        let config = load_config_from_path(&path).expect("config");
        assert_eq!(config.bridge.command_path, "/opt/adb");
        assert_eq!(config.bridge.command_timeout_ms, 3000);
        assert_eq!(config.logcat, LogcatSettings::default());
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = TelemetryConfig::default();
        config.bridge.command_timeout_ms = 0;
        config.logcat.max_lines = 5;
        config.logcat.default_filters = vec!["  ".to_string()];
        config.monitor.cpu_interval_ms = 1;
        config.monitor.gc_interval_ms = 10_000_000;
        let validated = validate_config(config);
        assert_eq!(validated.bridge.command_timeout_ms, 10_000);
        assert_eq!(validated.logcat.max_lines, 1000);
        assert_eq!(validated.logcat.default_filters, default_logcat_filters());
        assert_eq!(validated.monitor.cpu_interval_ms, MIN_INTERVAL_MS);
        assert_eq!(validated.monitor.gc_interval_ms, MAX_INTERVAL_MS);
    }

    #[test]
    fn save_keeps_backup_of_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = TelemetryConfig::default();
        save_config_to_path(&config, &path, &backup).expect("first save");
        assert!(!backup.exists());

        config.logcat.max_lines = 2500;
        save_config_to_path(&config, &path, &backup).expect("second save");
        assert!(backup.exists());
        let reloaded = load_config_from_path(&path).expect("reload");
        assert_eq!(reloaded.logcat.max_lines, 2500);
        let previous = load_config_from_path(&backup).expect("backup");
        assert_eq!(previous.logcat.max_lines, 1000);
    }
}
