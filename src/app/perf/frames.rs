use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::FpsInfo;

pub const DEFAULT_FPS: f64 = 60.0;
const MAX_PLAUSIBLE_FRAME_MS: f64 = 1000.0;

// framestats columns: Flags, IntendedVsync, Vsync, ..., FrameCompleted (index 13).
const INTENDED_VSYNC_COL: usize = 1;
const VSYNC_COL: usize = 2;
const FRAME_COMPLETED_COL: usize = 13;

fn frame_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+,\d+,").expect("valid framestats row regex"))
}

fn counter_after(line: &str, label: &str) -> Option<u64> {
    let rest = line.trim().strip_prefix(label)?;
    rest.split_whitespace()
        .next()
        .and_then(|value| value.parse::<u64>().ok())
}

/// `Total frames rendered` and `Janky frames` from the gfxinfo header. First occurrence wins.
pub fn parse_frame_counters(output: &str) -> (Option<u64>, Option<u64>) {
    let mut total = None;
    let mut janky = None;
    for line in output.lines() {
        if total.is_none() {
            total = counter_after(line, "Total frames rendered:");
        }
        if janky.is_none() {
            janky = counter_after(line, "Janky frames:");
        }
        if total.is_some() && janky.is_some() {
            break;
        }
    }
    (total, janky)
}

/// Frame durations in ms from the framestats CSV rows, keeping only `(0, 1000)` ms.
pub fn parse_frame_times_ms(output: &str) -> Vec<f64> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| frame_row_re().is_match(line))
        .filter_map(|line| {
            let cols: Vec<u64> = line
                .split(',')
                .map(|value| value.trim().parse::<u64>().unwrap_or(0))
                .collect();
            let end_col = if cols.len() > FRAME_COMPLETED_COL {
                FRAME_COMPLETED_COL
            } else {
                VSYNC_COL
            };
            let start = *cols.get(INTENDED_VSYNC_COL)?;
            let end = *cols.get(end_col)?;
            let delta_ns = end.checked_sub(start)?;
            Some(delta_ns as f64 / 1_000_000.0)
        })
        .filter(|ms| *ms > 0.0 && *ms < MAX_PLAUSIBLE_FRAME_MS)
        .collect()
}

/// Nearest-rank percentile over an ascending list: index `ceil(p/100 * n) - 1`,
/// clamped to the list bounds. Empty input yields `0.0`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

pub fn estimate_fps(frame_times_ms: &[f64]) -> f64 {
    if frame_times_ms.is_empty() {
        return DEFAULT_FPS;
    }
    let mean = frame_times_ms.iter().sum::<f64>() / frame_times_ms.len() as f64;
    if mean <= 0.0 {
        return DEFAULT_FPS;
    }
    (1000.0 / mean).min(DEFAULT_FPS)
}

/// Combines the counters and the per-frame rows of one `gfxinfo framestats` dump.
///
/// Returns `None` when the dump carries neither, e.g. when the package is not running.
pub fn parse_gfxinfo(output: &str, timestamp_ms: i64) -> Option<FpsInfo> {
    let (total, janky) = parse_frame_counters(output);
    let mut frame_times = parse_frame_times_ms(output);
    if total.is_none() && frame_times.is_empty() {
        return None;
    }

    frame_times.sort_by(|a, b| a.total_cmp(b));
    Some(FpsInfo {
        timestamp_ms,
        fps: estimate_fps(&frame_times),
        janky_frames: janky.unwrap_or(0),
        total_frames: total.unwrap_or(frame_times.len() as u64),
        p90_ms: percentile(&frame_times, 90.0),
        p95_ms: percentile(&frame_times, 95.0),
        p99_ms: percentile(&frame_times, 99.0),
        sampled_frames: frame_times.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_row(intended_ns: u64, completed_ns: u64) -> String {
        let mut cols = vec![0u64; 14];
        cols[INTENDED_VSYNC_COL] = intended_ns;
        cols[VSYNC_COL] = intended_ns;
        cols[FRAME_COMPLETED_COL] = completed_ns;
        cols.iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn nearest_rank_percentile() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 90.0), 50.0);
        assert_eq!(percentile(&sorted, 50.0), 30.0);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }

    #[test]
    fn fps_is_capped_and_defaults_without_frames() {
        assert_eq!(estimate_fps(&[]), DEFAULT_FPS);
        assert_eq!(estimate_fps(&[8.0, 8.0]), DEFAULT_FPS);
        assert_eq!(estimate_fps(&[20.0, 30.0]), 40.0);
    }

    #[test]
    fn frame_rows_use_completed_minus_intended() {
        let output = format!(
            "---PROFILEDATA---\nFlags,IntendedVsync,Vsync,OldestInputEvent\n{}\n{}\n{}\n---PROFILEDATA---\n",
            frame_row(1_000_000_000, 1_016_000_000),
            frame_row(2_000_000_000, 2_033_000_000),
            frame_row(3_000_000_000, 5_000_000_000),
        );
        let times = parse_frame_times_ms(&output);
        assert_eq!(times, vec![16.0, 33.0]);
    }

    #[test]
    fn short_rows_fall_back_to_vsync_delta() {
        let times = parse_frame_times_ms("0,1000000,17000000,\n0,5,5,\n");
        assert_eq!(times, vec![16.0]);
    }

    #[test]
    fn gfxinfo_combines_counters_and_frames() {
        let output = format!(
            "Applications Graphics Acceleration Info:\n\nTotal frames rendered: 120\nJanky frames: 6 (5.00%)\n50th percentile: 9ms\n{}\n{}\n",
            frame_row(0, 10_000_000),
            frame_row(100_000_000, 140_000_000),
        );
        let info = parse_gfxinfo(&output, 3).expect("fps");
        assert_eq!(info.timestamp_ms, 3);
        assert_eq!(info.total_frames, 120);
        assert_eq!(info.janky_frames, 6);
        assert_eq!(info.sampled_frames, 2);
        assert_eq!(info.p90_ms, 40.0);
        assert_eq!(info.fps, 40.0);
    }

    #[test]
    fn counters_only_reports_default_fps() {
        let info = parse_gfxinfo("Total frames rendered: 0\nJanky frames: 0 (0.00%)\n", 0).expect("fps");
        assert_eq!(info.fps, DEFAULT_FPS);
        assert_eq!(info.sampled_frames, 0);
        assert_eq!(info.p99_ms, 0.0);
    }

    #[test]
    fn empty_dump_is_rejected() {
        assert!(parse_gfxinfo("No process found for: com.missing\n", 0).is_none());
    }
}
