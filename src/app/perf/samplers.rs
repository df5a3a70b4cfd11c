use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::app::adb::apps::{parse_package_uid, parse_pidof_output};
use crate::app::adb::runner::{device_args, read_stdout, Bridge};
use crate::app::logcat::parse::parse_log_line;
use crate::app::models::{BatteryInfo, CpuInfo, FpsInfo, GcInfo, LogEntry, MemoryInfo, NetworkInfo};
use crate::app::perf::frames::parse_gfxinfo;
use crate::app::perf::gc::{summarize_gc, GcCursor};
use crate::app::perf::monitor::{MetricKind, MetricSampler};
use crate::app::perf::parse::{
    compute_rate_bps, parse_battery, parse_cpu_info, parse_meminfo, parse_netstats_uid_totals,
    parse_xt_qtaguid_uid_totals,
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct MemorySampler {
    serial: String,
    package: String,
}

impl MemorySampler {
    pub fn new(serial: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
        }
    }
}

impl MetricSampler for MemorySampler {
    type Sample = MemoryInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Memory
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<MemoryInfo> {
        let args = device_args(&self.serial, &["shell", "dumpsys", "meminfo", &self.package]);
        let output = read_stdout(bridge, &args, trace_id)?;
        parse_meminfo(&output, now_ms())
    }
}

pub struct CpuSampler {
    serial: String,
    package: String,
}

impl CpuSampler {
    pub fn new(serial: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
        }
    }
}

impl MetricSampler for CpuSampler {
    type Sample = CpuInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Cpu
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<CpuInfo> {
        let args = device_args(&self.serial, &["shell", "top", "-n", "1", "-b"]);
        let output = read_stdout(bridge, &args, trace_id)?;
        parse_cpu_info(&output, &self.package, now_ms())
    }
}

/// Resets the frame counters, waits `settle_delay`, then reads `framestats`.
pub struct FpsSampler {
    serial: String,
    package: String,
    settle_delay: Duration,
}

impl FpsSampler {
    pub fn new(serial: impl Into<String>, package: impl Into<String>, settle_delay: Duration) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
            settle_delay,
        }
    }
}

impl MetricSampler for FpsSampler {
    type Sample = FpsInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Fps
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<FpsInfo> {
        let reset = device_args(
            &self.serial,
            &["shell", "dumpsys", "gfxinfo", &self.package, "reset"],
        );
        read_stdout(bridge, &reset, trace_id)?;
        std::thread::sleep(self.settle_delay);

        let framestats = device_args(
            &self.serial,
            &["shell", "dumpsys", "gfxinfo", &self.package, "framestats"],
        );
        let output = read_stdout(bridge, &framestats, trace_id)?;
        parse_gfxinfo(&output, now_ms())
    }
}

pub struct BatterySampler {
    serial: String,
}

impl BatterySampler {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl MetricSampler for BatterySampler {
    type Sample = BatteryInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Battery
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<BatteryInfo> {
        let args = device_args(&self.serial, &["shell", "dumpsys", "battery"]);
        let output = read_stdout(bridge, &args, trace_id)?;
        parse_battery(&output, now_ms())
    }
}

/// Aggregates the ART/Dalvik GC lines logged since the previous tick.
pub struct GcSampler {
    serial: String,
    package: String,
    log_window: u32,
    cursor: Option<GcCursor>,
}

impl GcSampler {
    pub fn new(serial: impl Into<String>, package: impl Into<String>, log_window: u32) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
            log_window: log_window.max(1),
            cursor: None,
        }
    }

    fn resolve_pid(&self, bridge: &dyn Bridge, trace_id: &str) -> Option<u32> {
        let args = device_args(&self.serial, &["shell", "pidof", &self.package]);
        read_stdout(bridge, &args, trace_id).and_then(|output| parse_pidof_output(&output))
    }
}

impl MetricSampler for GcSampler {
    type Sample = GcInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Gc
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<GcInfo> {
        // Without a pid the art/dalvikvm lines belong to other processes.
        let Some(pid) = self.resolve_pid(bridge, trace_id) else {
            debug!(trace_id = %trace_id, serial = %self.serial, package = %self.package, "gc: package not running");
            return None;
        };
        let window = self.log_window.to_string();
        let args = device_args(
            &self.serial,
            &[
                "shell", "logcat", "-d", "-v", "time", "-t", &window, "-s", "art", "dalvikvm",
            ],
        );
        let output = read_stdout(bridge, &args, trace_id)?;
        let entries: Vec<LogEntry> = output.lines().filter_map(parse_log_line).collect();

        let (info, cursor) = summarize_gc(&entries, pid, self.cursor.as_ref(), now_ms());
        self.cursor = cursor;
        Some(info)
    }
}

/// Cumulative per-uid traffic with rates against the previous tick.
pub struct NetworkSampler {
    serial: String,
    package: String,
    uid: Option<u32>,
    previous: Option<((u64, u64), Instant)>,
}

impl NetworkSampler {
    pub fn new(serial: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
            uid: None,
            previous: None,
        }
    }

    fn uid(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<u32> {
        if self.uid.is_none() {
            let args = device_args(
                &self.serial,
                &["shell", "cmd", "package", "list", "packages", "-U", &self.package],
            );
            self.uid = read_stdout(bridge, &args, trace_id)
                .and_then(|output| parse_package_uid(&output, &self.package));
        }
        self.uid
    }

    fn totals(&self, bridge: &dyn Bridge, uid: u32, trace_id: &str) -> Option<(u64, u64)> {
        let netstats = device_args(&self.serial, &["shell", "dumpsys", "netstats"]);
        if let Some(totals) = read_stdout(bridge, &netstats, trace_id)
            .and_then(|output| parse_netstats_uid_totals(&output, uid))
        {
            return Some(totals);
        }
        let qtaguid = device_args(&self.serial, &["shell", "cat", "/proc/net/xt_qtaguid/stats"]);
        read_stdout(bridge, &qtaguid, trace_id)
            .and_then(|output| parse_xt_qtaguid_uid_totals(&output, uid))
    }
}

impl MetricSampler for NetworkSampler {
    type Sample = NetworkInfo;

    fn kind(&self) -> MetricKind {
        MetricKind::Network
    }

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<NetworkInfo> {
        let uid = self.uid(bridge, trace_id)?;
        let (rx_bytes, tx_bytes) = self.totals(bridge, uid, trace_id)?;
        let now = Instant::now();

        let (rx_bps, tx_bps) = match self.previous {
            Some(((prev_rx, prev_tx), at)) => {
                let dt_ms = now.duration_since(at).as_millis();
                (
                    compute_rate_bps(prev_rx, rx_bytes, dt_ms),
                    compute_rate_bps(prev_tx, tx_bytes, dt_ms),
                )
            }
            None => (None, None),
        };
        self.previous = Some(((rx_bytes, tx_bytes), now));

        Some(NetworkInfo {
            timestamp_ms: now_ms(),
            uid,
            rx_bytes,
            tx_bytes,
            rx_bps,
            tx_bps,
        })
    }
}
