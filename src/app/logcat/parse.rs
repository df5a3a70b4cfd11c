use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{LogEntry, LogLevel};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// `-v time` line with a pid group: `05-02 14:33:21.123 I/Tag( 1234): message`.
fn with_pid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<ts>\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3})\s+(?P<level>[VDIWEFS])/(?P<tag>[^(:]*)\(\s*(?P<pid>\d+)\s*\):\s?(?P<msg>.*)$",
        )
        .expect("valid logcat pid regex")
    })
}

/// Same format without the pid group: `05-02 14:33:21.123 W/Tag: message`.
fn without_pid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<ts>\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3})\s+(?P<level>[VDIWEFS])/(?P<tag>[^:]*):\s?(?P<msg>.*)$",
        )
        .expect("valid logcat regex")
    })
}

pub fn next_entry_id() -> u64 {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Parses one logcat line. Lines in neither grammar are not log entries and yield `None`.
pub fn parse_log_line(line: &str) -> Option<LogEntry> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (caps, pid) = match with_pid_re().captures(line) {
        Some(caps) => {
            let pid = caps.name("pid").and_then(|m| m.as_str().parse::<u32>().ok());
            (caps, pid)
        }
        None => (without_pid_re().captures(line)?, None),
    };

    let level = caps
        .name("level")
        .and_then(|m| m.as_str().chars().next())
        .and_then(LogLevel::from_char)?;

    Some(LogEntry {
        id: next_entry_id(),
        timestamp: caps["ts"].to_string(),
        level,
        tag: caps["tag"].trim().to_string(),
        pid,
        message: caps["msg"].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_with_pid() {
        let entry = parse_log_line("05-02 14:33:21.123 I/ReactNativeJS( 1234): Hello").expect("entry");
        assert_eq!(entry.timestamp, "05-02 14:33:21.123");
        assert_eq!(entry.level, LogLevel::I);
        assert_eq!(entry.tag, "ReactNativeJS");
        assert_eq!(entry.pid, Some(1234));
        assert_eq!(entry.message, "Hello");
    }

    #[test]
    fn parenthesized_number_in_message_is_not_a_pid() {
        let entry = parse_log_line("05-02 14:33:21.123 I/Tag: see (42): x").expect("entry");
        assert_eq!(entry.tag, "Tag");
        assert_eq!(entry.pid, None);
        assert_eq!(entry.message, "see (42): x");
    }

    #[test]
    fn parses_line_without_pid() {
        let entry = parse_log_line("12-31 23:59:59.999 W/ActivityManager: Slow operation").expect("entry");
        assert_eq!(entry.level, LogLevel::W);
        assert_eq!(entry.tag, "ActivityManager");
        assert_eq!(entry.pid, None);
        assert_eq!(entry.message, "Slow operation");
    }

    #[test]
    fn trims_padded_tags() {
        let entry = parse_log_line("01-01 00:00:00.000 E/chromium  (  987): [ERROR] boom\r").expect("entry");
        assert_eq!(entry.tag, "chromium");
        assert_eq!(entry.pid, Some(987));
        assert_eq!(entry.message, "[ERROR] boom");
    }

    #[test]
    fn keeps_colons_inside_message() {
        let entry = parse_log_line("01-01 00:00:00.000 D/Net( 5): url: http://x:80/").expect("entry");
        assert_eq!(entry.message, "url: http://x:80/");
    }

    #[test]
    fn rejects_free_form_and_unknown_levels() {
        assert!(parse_log_line("--------- beginning of main").is_none());
        assert!(parse_log_line("").is_none());
        assert!(parse_log_line("05-02 14:33:21.123 X/Tag( 1): nope").is_none());
        assert!(parse_log_line("5-2 14:33:21 I/Tag: short timestamp").is_none());
    }

    #[test]
    fn ids_are_unique_per_line() {
        let a = parse_log_line("05-02 14:33:21.123 I/A: one").expect("a");
        let b = parse_log_line("05-02 14:33:21.123 I/A: one").expect("b");
        assert_ne!(a.id, b.id);
    }
}
