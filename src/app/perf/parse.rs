use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{BatteryInfo, BatteryStatus, CpuInfo, MemoryInfo};

// ---------------------------------------------------------------------------------------------
// dumpsys meminfo <package>
// ---------------------------------------------------------------------------------------------

fn meminfo_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*TOTAL(?:\s+PSS)?:?\s+(\d+)").expect("valid meminfo total regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemCategory {
    JavaHeap,
    NativeHeap,
    Graphics,
    Stack,
    Code,
    System,
}

/// App Summary labels. The value is the first integer after the label (the PSS column).
const SUMMARY_LABELS: [(&str, MemCategory); 6] = [
    ("Java Heap:", MemCategory::JavaHeap),
    ("Native Heap:", MemCategory::NativeHeap),
    ("Graphics:", MemCategory::Graphics),
    ("Stack:", MemCategory::Stack),
    ("Code:", MemCategory::Code),
    ("System:", MemCategory::System),
];

fn tabular_category(label: &str) -> Option<MemCategory> {
    match label {
        "Dalvik Heap" => Some(MemCategory::JavaHeap),
        "Native Heap" => Some(MemCategory::NativeHeap),
        "Gfx dev" | "EGL mtrack" | "GL mtrack" => Some(MemCategory::Graphics),
        "Stack" => Some(MemCategory::Stack),
        ".so mmap" | ".jar mmap" | ".apk mmap" | ".dex mmap" | ".oat mmap" | ".art mmap" => {
            Some(MemCategory::Code)
        }
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CategoryTotals {
    java_heap: Option<u64>,
    native_heap: Option<u64>,
    graphics: Option<u64>,
    stack: Option<u64>,
    code: Option<u64>,
    system: Option<u64>,
}

impl CategoryTotals {
    fn slot(&mut self, category: MemCategory) -> &mut Option<u64> {
        match category {
            MemCategory::JavaHeap => &mut self.java_heap,
            MemCategory::NativeHeap => &mut self.native_heap,
            MemCategory::Graphics => &mut self.graphics,
            MemCategory::Stack => &mut self.stack,
            MemCategory::Code => &mut self.code,
            MemCategory::System => &mut self.system,
        }
    }

    fn add(&mut self, category: MemCategory, value: u64) {
        let slot = self.slot(category);
        *slot = Some(slot.unwrap_or(0).saturating_add(value));
    }

    fn set_if_absent(&mut self, category: MemCategory, value: u64) {
        let slot = self.slot(category);
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

fn first_integer(text: &str) -> Option<u64> {
    text.split_whitespace()
        .find_map(|token| token.parse::<u64>().ok())
}

/// Tabular row: `<label words> <pss> <rss> ... <swap>`. Returns the label and the pss column.
fn split_tabular_row(line: &str) -> Option<(String, u64)> {
    if line.contains(':') {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first_numeric = tokens
        .iter()
        .position(|token| token.parse::<u64>().is_ok())?;
    if first_numeric == 0 {
        return None;
    }
    let pss = tokens[first_numeric].parse::<u64>().ok()?;
    Some((tokens[..first_numeric].join(" "), pss))
}

/// Parses `dumpsys meminfo <package>`.
///
/// Category values come from the App Summary block when present and from the per-category
/// table otherwise. A sample without a TOTAL row is rejected.
pub fn parse_meminfo(output: &str, timestamp_ms: i64) -> Option<MemoryInfo> {
    let mut total: Option<u64> = None;
    let mut summary = CategoryTotals::default();
    let mut tabular = CategoryTotals::default();

    for line in output.lines() {
        if total.is_none() {
            if let Some(caps) = meminfo_total_re().captures(line) {
                total = caps[1].parse::<u64>().ok();
                continue;
            }
        }

        let mut matched_summary = false;
        for (label, category) in SUMMARY_LABELS {
            if let Some(index) = line.find(label) {
                if let Some(value) = first_integer(&line[index + label.len()..]) {
                    summary.set_if_absent(category, value);
                    matched_summary = true;
                }
                break;
            }
        }
        if matched_summary {
            continue;
        }

        if let Some((label, pss)) = split_tabular_row(line) {
            if let Some(category) = tabular_category(&label) {
                tabular.add(category, pss);
            }
        }
    }

    let total = total?;
    let pick = |from_summary: Option<u64>, from_table: Option<u64>| {
        from_summary.or(from_table).unwrap_or(0)
    };
    let java_heap = pick(summary.java_heap, tabular.java_heap);
    let native_heap = pick(summary.native_heap, tabular.native_heap);
    let graphics = pick(summary.graphics, tabular.graphics);
    let stack = pick(summary.stack, tabular.stack);
    let code = pick(summary.code, tabular.code);
    let system = pick(summary.system, tabular.system);

    let known = java_heap
        .saturating_add(native_heap)
        .saturating_add(graphics)
        .saturating_add(stack)
        .saturating_add(code)
        .saturating_add(system);

    Some(MemoryInfo {
        timestamp_ms,
        total_pss_kb: total,
        java_heap_kb: java_heap,
        native_heap_kb: native_heap,
        graphics_kb: graphics,
        stack_kb: stack,
        code_kb: code,
        system_kb: system,
        other_kb: total.saturating_sub(known),
    })
}

// ---------------------------------------------------------------------------------------------
// top -n 1 -b
// ---------------------------------------------------------------------------------------------

/// Revision of the CPU column heuristic below. Bump when the extraction rules change.
pub const CPU_EXTRACTOR_VERSION: u32 = 1;

/// First column considered when looking for `%CPU` in a `top` process row.
///
/// toybox `top` (Android 7+) prints `PID USER PR NI VIRT RES SHR S %CPU %MEM TIME+ ARGS`;
/// older builds use `PID PR CPU% S #THR VSS RSS PCY UID Name`. Column 7 onwards skips the
/// identity and size columns in both layouts while still reaching `%CPU`.
pub const CPU_COLUMN_START: usize = 7;

/// Best-effort `%CPU` extractor for the rows of `top` that mention `package`.
///
/// Scans whitespace-split columns from `CPU_COLUMN_START`, left to right, and returns the
/// first value that parses as a float within `[0, 100]`. Column order differs across
/// Android releases, so this is a positional guess rather than a header lookup.
pub fn extract_cpu_percent(top_output: &str, package: &str) -> Option<f64> {
    top_output
        .lines()
        .filter(|line| line.contains(package))
        .find_map(|line| {
            line.split_whitespace()
                .skip(CPU_COLUMN_START)
                .filter_map(|token| token.parse::<f64>().ok())
                .find(|value| (0.0..=100.0).contains(value))
        })
}

pub fn parse_cpu_info(top_output: &str, package: &str, timestamp_ms: i64) -> Option<CpuInfo> {
    extract_cpu_percent(top_output, package).map(|usage_percent| CpuInfo {
        timestamp_ms,
        usage_percent,
    })
}

// ---------------------------------------------------------------------------------------------
// dumpsys battery
// ---------------------------------------------------------------------------------------------

pub fn parse_battery(output: &str, timestamp_ms: i64) -> Option<BatteryInfo> {
    let mut level: Option<u8> = None;
    let mut scale: Option<u32> = None;
    let mut temperature_decic: Option<i32> = None;
    let mut voltage_mv: Option<u32> = None;
    let mut status = BatteryStatus::Unknown;
    let mut plugged: Option<String> = None;
    let mut health: Option<i32> = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "level" => level = value.parse::<u8>().ok(),
            "scale" => scale = value.parse::<u32>().ok(),
            "temperature" => temperature_decic = value.parse::<i32>().ok(),
            "voltage" => voltage_mv = value.parse::<u32>().ok(),
            "status" => {
                if let Ok(code) = value.parse::<i32>() {
                    status = BatteryStatus::from_code(code);
                }
            }
            "health" => health = value.parse::<i32>().ok(),
            "AC powered" | "USB powered" | "Wireless powered" | "Dock powered"
                if value == "true" && plugged.is_none() =>
            {
                let source = key.trim().trim_end_matches(" powered").to_lowercase();
                plugged = Some(source);
            }
            _ => {}
        }
    }

    Some(BatteryInfo {
        timestamp_ms,
        level: level?,
        scale,
        temperature_c: temperature_decic.map(|value| f64::from(value) / 10.0),
        voltage_mv,
        status,
        plugged,
        health,
    })
}

// ---------------------------------------------------------------------------------------------
// Network usage per uid
// ---------------------------------------------------------------------------------------------

/// Reads `uid`'s totals from the `mAppUidStatsMap` block of `dumpsys netstats`.
///
/// Example section:
/// - `mAppUidStatsMap:`
/// - `uid rxBytes rxPackets txBytes txPackets`
/// - `10242 321596 726 118381 706`
pub fn parse_netstats_uid_totals(output: &str, uid: u32) -> Option<(u64, u64)> {
    let mut in_section = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if !in_section {
            in_section = trimmed == "uid rxBytes rxPackets txBytes txPackets";
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(row_uid) = parts.first().and_then(|value| value.parse::<u32>().ok()) else {
            break;
        };
        if row_uid != uid || parts.len() < 4 {
            continue;
        }
        let rx = parts[1].parse::<u64>().ok()?;
        let tx = parts[3].parse::<u64>().ok()?;
        return Some((rx, tx));
    }
    None
}

/// Sums `uid`'s rows in `/proc/net/xt_qtaguid/stats`, skipping loopback.
///
/// Column positions are resolved from the header because their order varies by release.
pub fn parse_xt_qtaguid_uid_totals(output: &str, uid: u32) -> Option<(u64, u64)> {
    let mut lines = output.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = lines.next()?.split_whitespace().collect();
    let column = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| header.iter().position(|value| value == name))
    };
    let iface_index = column(&["iface"])?;
    let uid_index = column(&["uid_tag_int", "uid"])?;
    let rx_index = column(&["rx_bytes"])?;
    let tx_index = column(&["tx_bytes"])?;
    let required_len = iface_index.max(uid_index).max(rx_index).max(tx_index) + 1;

    let mut seen = false;
    let mut totals = (0u64, 0u64);
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < required_len || parts[iface_index] == "lo" {
            continue;
        }
        if parts[uid_index].parse::<u32>().ok() != Some(uid) {
            continue;
        }
        let (Ok(rx), Ok(tx)) = (parts[rx_index].parse::<u64>(), parts[tx_index].parse::<u64>())
        else {
            continue;
        };
        totals.0 = totals.0.saturating_add(rx);
        totals.1 = totals.1.saturating_add(tx);
        seen = true;
    }
    seen.then_some(totals)
}

/// Bytes per second between two cumulative counters. Counter resets yield zero.
pub fn compute_rate_bps(prev: u64, curr: u64, dt_ms: u128) -> Option<u64> {
    if dt_ms == 0 {
        return None;
    }
    let delta = curr.saturating_sub(prev) as u128;
    Some(((delta * 1000u128) / dt_ms).min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_summary_lines_and_other_remainder() {
        let input = "TOTAL  45000\n   Java Heap:   12000\n   Native Heap:   8000";
        let mem = parse_meminfo(input, 7).expect("meminfo");
        assert_eq!(mem.timestamp_ms, 7);
        assert_eq!(mem.total_pss_kb, 45000);
        assert_eq!(mem.java_heap_kb, 12000);
        assert_eq!(mem.native_heap_kb, 8000);
        assert_eq!(mem.other_kb, 25000);
    }

    #[test]
    fn meminfo_full_dump_prefers_app_summary() {
        let input = r#"
Applications Memory Usage (in Kilobytes):
Uptime: 1234 Realtime: 1234

** MEMINFO in pid 4321 [com.example.app] **
                   Pss  Private  Private  SwapPss      Rss     Heap     Heap     Heap
                 Total    Dirty    Clean    Dirty    Total     Size    Alloc     Free
                ------   ------   ------   ------   ------   ------   ------   ------
  Native Heap    10468    10408        0        0    20480    14462     5017     9000
  Dalvik Heap     2784     2708        0        0     8000     6000     3000     3000
        Stack      112      112        0        0      120
     .so mmap     3000      100     1500        0     9000
    .dex mmap     1000        0      900        0     2000
      Gfx dev      900      900        0        0      900
        TOTAL    30000    20000     4000        0    60000    20462     8017    12000

 App Summary
                       Pss(KB)                        Rss(KB)
                        ------                         ------
           Java Heap:     4000                          12000
         Native Heap:    10408                          20480
                Code:     2500                           9000
               Stack:      112                            120
            Graphics:      900                            900
       Private Other:     1200
              System:     5000
             Unknown:                                     500

           TOTAL PSS:    30000            TOTAL RSS:    60000       TOTAL SWAP PSS:        0
"#;
        let mem = parse_meminfo(input, 0).expect("meminfo");
        assert_eq!(mem.total_pss_kb, 30000);
        assert_eq!(mem.java_heap_kb, 4000);
        assert_eq!(mem.native_heap_kb, 10408);
        assert_eq!(mem.code_kb, 2500);
        assert_eq!(mem.stack_kb, 112);
        assert_eq!(mem.graphics_kb, 900);
        assert_eq!(mem.system_kb, 5000);
        assert_eq!(mem.other_kb, 30000 - (4000 + 10408 + 2500 + 112 + 900 + 5000));
    }

    #[test]
    fn meminfo_tabular_fallback_uses_pss_column() {
        let input = "  Native Heap    10468    10408        0\n  Dalvik Heap     2784     2708        0\n     .so mmap     3000      100     1500\n    .oat mmap      500        0      400\n        Stack      112      112        0\n        TOTAL    20000    15000     2000\n";
        let mem = parse_meminfo(input, 0).expect("meminfo");
        assert_eq!(mem.total_pss_kb, 20000);
        assert_eq!(mem.native_heap_kb, 10468);
        assert_eq!(mem.java_heap_kb, 2784);
        assert_eq!(mem.code_kb, 3500);
        assert_eq!(mem.stack_kb, 112);
        assert_eq!(mem.other_kb, 20000 - (10468 + 2784 + 3500 + 112));
    }

    #[test]
    fn meminfo_other_never_negative() {
        let input = "TOTAL: 100\nJava Heap: 80\nNative Heap: 80\n";
        let mem = parse_meminfo(input, 0).expect("meminfo");
        assert_eq!(mem.other_kb, 0);
    }

    #[test]
    fn meminfo_without_total_is_rejected() {
        assert!(parse_meminfo("   Java Heap:   12000\n   Native Heap:   8000", 0).is_none());
        assert!(parse_meminfo("No process found for: com.missing", 0).is_none());
    }

    #[test]
    fn cpu_extractor_handles_toybox_layout() {
        let top = "Tasks: 500 total\n  PID USER         PR  NI VIRT  RES  SHR S[%CPU] %MEM     TIME+ ARGS\n 4321 u0_a123      10 -10  14G 210M 120M S 12.5   3.1   0:42.10 com.example.app\n 4400 u0_a124      20   0  12G  90M  60M S  1.0   1.0   0:01.00 com.other\n";
        assert_eq!(extract_cpu_percent(top, "com.example.app"), Some(12.5));
    }

    #[test]
    fn cpu_extractor_handles_legacy_layout() {
        // PID PR CPU% S #THR VSS RSS PCY UID Name
        let top = " 4321  1   7% S    40 1500000K  90000K  fg u0_a123  com.example.app\n";
        // The percentage column carries a `%` suffix here, so nothing qualifies.
        assert_eq!(extract_cpu_percent(top, "com.example.app"), None);

        let top = " 4321 u0_a123 10 -10 1.2G 90M 60M 33 S 2.0 0:01.00 com.example.app\n";
        assert_eq!(extract_cpu_percent(top, "com.example.app"), Some(33.0));
    }

    #[test]
    fn cpu_extractor_skips_out_of_range_values() {
        let top = " 1 a b c d e f 250.0 nan 42.0 com.example.app\n";
        assert_eq!(extract_cpu_percent(top, "com.example.app"), Some(42.0));
        assert!(parse_cpu_info("", "com.example.app", 0).is_none());
    }

    #[test]
    fn battery_fields_and_plug_source() {
        let input = "Current Battery Service state:\n  AC powered: false\n  USB powered: true\n  Wireless powered: false\n  status: 2\n  health: 2\n  level: 85\n  scale: 100\n  voltage: 4123\n  temperature: 301\n";
        let battery = parse_battery(input, 5).expect("battery");
        assert_eq!(battery.level, 85);
        assert_eq!(battery.scale, Some(100));
        assert_eq!(battery.voltage_mv, Some(4123));
        assert_eq!(battery.temperature_c, Some(30.1));
        assert_eq!(battery.status, BatteryStatus::Charging);
        assert_eq!(battery.plugged.as_deref(), Some("usb"));
    }

    #[test]
    fn battery_without_level_is_rejected() {
        assert!(parse_battery("AC powered: true\n", 0).is_none());
    }

    #[test]
    fn netstats_uid_totals() {
        let input = r#"
mAppUidStatsMap:
  uid rxBytes rxPackets txBytes txPackets
  10242 321596 726 118381 706
  1000 17060394 57975 2422085 11204
mIfaceStatsMap:
"#;
        assert_eq!(parse_netstats_uid_totals(input, 10242), Some((321596, 118381)));
        assert_eq!(parse_netstats_uid_totals(input, 99999), None);
    }

    #[test]
    fn xt_qtaguid_totals_resolve_header_and_skip_loopback() {
        let input = "idx iface acct_tag_hex uid_tag_int cnt_set rx_bytes rx_packets tx_bytes tx_packets\n2 wlan0 0x0 10234 0 100 1 200 2\n3 rmnet0 0x0 10234 1 50 1 25 1\n4 lo 0x0 10234 0 999 1 999 1\n5 wlan0 0x0 1000 0 10 1 20 1\n";
        assert_eq!(parse_xt_qtaguid_uid_totals(input, 10234), Some((150, 225)));
        assert_eq!(parse_xt_qtaguid_uid_totals(input, 4242), None);
    }

    #[test]
    fn rate_handles_resets_and_zero_interval() {
        assert_eq!(compute_rate_bps(1000, 3000, 2000), Some(1000));
        assert_eq!(compute_rate_bps(3000, 1000, 1000), Some(0));
        assert_eq!(compute_rate_bps(0, 10, 0), None);
    }
}
