use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Device,
    Offline,
    Unauthorized,
    Unknown,
}

impl DeviceStatus {
    pub fn from_adb_state(value: &str) -> Self {
        match value.trim() {
            "device" => DeviceStatus::Device,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            _ => DeviceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LogLevel {
    V,
    D,
    I,
    W,
    E,
    F,
    S,
}

impl LogLevel {
    pub fn from_char(value: char) -> Option<Self> {
        match value {
            'V' => Some(LogLevel::V),
            'D' => Some(LogLevel::D),
            'I' => Some(LogLevel::I),
            'W' => Some(LogLevel::W),
            'E' => Some(LogLevel::E),
            'F' => Some(LogLevel::F),
            'S' => Some(LogLevel::S),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            LogLevel::V => 'V',
            LogLevel::D => 'D',
            LogLevel::I => 'I',
            LogLevel::W => 'W',
            LogLevel::E => 'E',
            LogLevel::F => 'F',
            LogLevel::S => 'S',
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: u64,
    /// `MM-DD HH:MM:SS.mmm`, exactly as logcat printed it.
    pub timestamp: String,
    pub level: LogLevel,
    pub tag: String,
    pub pid: Option<u32>,
    pub message: String,
}

/// Per-process memory sample from `dumpsys meminfo`, in the KB units meminfo reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryInfo {
    pub timestamp_ms: i64,
    pub total_pss_kb: u64,
    pub java_heap_kb: u64,
    pub native_heap_kb: u64,
    pub graphics_kb: u64,
    pub stack_kb: u64,
    pub code_kb: u64,
    pub system_kb: u64,
    pub other_kb: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CpuInfo {
    pub timestamp_ms: i64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FpsInfo {
    pub timestamp_ms: i64,
    pub fps: f64,
    pub janky_frames: u64,
    pub total_frames: u64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub sampled_frames: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl BatteryStatus {
    /// Maps the integer `status:` field of `dumpsys battery` (BatteryManager constants).
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => BatteryStatus::Charging,
            3 => BatteryStatus::Discharging,
            4 => BatteryStatus::NotCharging,
            5 => BatteryStatus::Full,
            _ => BatteryStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryInfo {
    pub timestamp_ms: i64,
    pub level: u8,
    pub scale: Option<u32>,
    pub temperature_c: Option<f64>,
    pub voltage_mv: Option<u32>,
    pub status: BatteryStatus,
    pub plugged: Option<String>,
    pub health: Option<i32>,
}

/// GC activity seen in the target's runtime log since the previous tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GcInfo {
    pub timestamp_ms: i64,
    pub gc_count: u32,
    pub freed_kb: u64,
    pub total_pause_ms: f64,
    pub last_free_percent: Option<u8>,
    pub heap_used_kb: Option<u64>,
    pub heap_total_kb: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInfo {
    pub timestamp_ms: i64,
    pub uid: u32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_bps: Option<u64>,
    pub tx_bps: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdbInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub serial: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}
