use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{GcInfo, LogEntry};

/// One collection reported by ART (`... GC freed 1234(56KB) AllocSpace objects, ...`) or
/// Dalvik (`GC_CONCURRENT freed 1234K, 49% free 5678K/10240K, paused 2ms+3ms`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcEvent {
    pub freed_kb: u64,
    pub pause_ms: f64,
    pub free_percent: Option<u8>,
    pub heap_used_kb: Option<u64>,
    pub heap_total_kb: Option<u64>,
}

fn art_freed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d+\(\s*(\d+(?:\.\d+)?)\s*([KMG]?B)\)").expect("valid art freed regex")
    })
}

fn dalvik_freed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"freed (\d+)K").expect("valid dalvik freed regex"))
}

fn free_percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3})% free").expect("valid free percent regex"))
}

fn heap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)([KMG]B?)/(\d+(?:\.\d+)?)([KMG]B?)").expect("valid heap regex")
    })
}

fn paused_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"paused ((?:\d+(?:\.\d+)?(?:us|ms|s)[,+]?)+)").expect("valid paused regex")
    })
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)(us|ms|s)").expect("valid duration regex"))
}

fn to_kb(value: f64, unit: &str) -> u64 {
    let kb = match unit.trim_end_matches('B') {
        "" => value / 1024.0,
        "K" => value,
        "M" => value * 1024.0,
        "G" => value * 1024.0 * 1024.0,
        _ => value,
    };
    kb.round().max(0.0) as u64
}

fn to_ms(value: f64, unit: &str) -> f64 {
    match unit {
        "us" => value / 1000.0,
        "s" => value * 1000.0,
        _ => value,
    }
}

pub fn parse_gc_message(message: &str) -> Option<GcEvent> {
    if !message.contains("GC") || !message.contains("freed") {
        return None;
    }

    let freed_kb = if message.contains("GC_") {
        dalvik_freed_re()
            .captures(message)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .unwrap_or(0)
    } else {
        art_freed_re()
            .captures_iter(message)
            .filter_map(|caps| {
                let value = caps[1].parse::<f64>().ok()?;
                Some(to_kb(value, &caps[2]))
            })
            .sum()
    };

    let free_percent = free_percent_re()
        .captures(message)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|value| *value <= 100);

    let (heap_used_kb, heap_total_kb) = match heap_re().captures(message) {
        Some(caps) => (
            caps[1].parse::<f64>().ok().map(|value| to_kb(value, &caps[2])),
            caps[3].parse::<f64>().ok().map(|value| to_kb(value, &caps[4])),
        ),
        None => (None, None),
    };

    let pause_ms = paused_re()
        .captures(message)
        .map(|caps| {
            duration_re()
                .captures_iter(&caps[1])
                .filter_map(|d| Some(to_ms(d[1].parse::<f64>().ok()?, &d[2])))
                .sum::<f64>()
        })
        .unwrap_or(0.0);

    Some(GcEvent {
        freed_kb,
        pause_ms,
        free_percent,
        heap_used_kb,
        heap_total_kb,
    })
}

/// The last line of the previous dump. `logcat -d` prints oldest first, so everything after
/// this line in the next dump is new, whatever the clock says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcCursor {
    timestamp: String,
    pid: Option<u32>,
    message: String,
}

impl GcCursor {
    fn of(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            pid: entry.pid,
            message: entry.message.clone(),
        }
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        self.pid == entry.pid && self.timestamp == entry.timestamp && self.message == entry.message
    }
}

/// Folds the GC lines logged by `pid` into one sample.
///
/// Only entries after `cursor` count. When the cursor line has scrolled out of the dump the
/// whole dump is new. Returns the sample and the cursor for the next call.
pub fn summarize_gc(
    entries: &[LogEntry],
    pid: u32,
    cursor: Option<&GcCursor>,
    timestamp_ms: i64,
) -> (GcInfo, Option<GcCursor>) {
    let mut info = GcInfo {
        timestamp_ms,
        gc_count: 0,
        freed_kb: 0,
        total_pause_ms: 0.0,
        last_free_percent: None,
        heap_used_kb: None,
        heap_total_kb: None,
    };

    let start = cursor
        .and_then(|cursor| entries.iter().rposition(|entry| cursor.matches(entry)))
        .map_or(0, |index| index + 1);

    for entry in &entries[start..] {
        if entry.pid != Some(pid) {
            continue;
        }
        let Some(event) = parse_gc_message(&entry.message) else {
            continue;
        };

        info.gc_count += 1;
        info.freed_kb = info.freed_kb.saturating_add(event.freed_kb);
        info.total_pause_ms += event.pause_ms;
        info.last_free_percent = event.free_percent.or(info.last_free_percent);
        info.heap_used_kb = event.heap_used_kb.or(info.heap_used_kb);
        info.heap_total_kb = event.heap_total_kb.or(info.heap_total_kb);
    }

    let next = entries.last().map(GcCursor::of).or_else(|| cursor.cloned());
    (info, next)
}
