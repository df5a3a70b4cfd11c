use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use droid_telemetry_lib::app::commands::{
    check_adb, close_session, init_app_state, list_devices, logcat_snapshot,
    start_battery_monitor, start_cpu_monitor, start_fps_monitor, start_gc_monitor, start_logcat,
    start_memory_monitor, start_network_monitor,
};
use droid_telemetry_lib::app::config::load_config;
use droid_telemetry_lib::app::error::AppError;
use droid_telemetry_lib::app::logging::init_logging;
use droid_telemetry_lib::app::models::DeviceStatus;
use droid_telemetry_lib::app::perf::monitor::SampleEmitter;
use droid_telemetry_lib::app::state::AppState;
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    package: String,
    seconds: u64,
    json: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    package: String,
    seconds: u64,
    samples: BTreeMap<&'static str, u64>,
    buffered_log_entries: usize,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn usage() -> String {
    "Usage: cargo run --bin smoke -- --package PACKAGE [--serial SERIAL] [--seconds N] [--json]\n"
        .to_string()
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut package: Option<String> = None;
    let mut seconds = DEFAULT_SECONDS;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--package" => {
                package = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if package.is_none() {
                    return Err("--package requires a value".to_string());
                }
            }
            "--seconds" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--seconds requires a value".to_string())?;
                seconds = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid --seconds value: {value}"))?;
            }
            "--json" => {
                json = true;
            }
            "-h" | "--help" => return Err(usage()),
            other => return Err(format!("Unknown arg: {other}\n{}", usage())),
        }
    }

    let package = package.ok_or_else(usage)?;
    Ok(Args {
        serial,
        package,
        seconds: seconds.max(1),
        json,
    })
}

fn run_check<T>(
    checks: &mut Vec<SmokeCheck>,
    name: &'static str,
    f: impl FnOnce() -> Result<T, AppError>,
) -> Option<T> {
    let start = Instant::now();
    match f() {
        Ok(value) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                error_code: None,
                error: None,
            });
            Some(value)
        }
        Err(err) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                error_code: Some(err.code),
                error: Some(err.error),
            });
            None
        }
    }
}

fn pick_single_device(state: &AppState, trace_id: &str) -> Result<String, AppError> {
    let devices = list_devices(state, Some(trace_id.to_string()))?.data;
    let online: Vec<_> = devices
        .into_iter()
        .filter(|device| device.status == DeviceStatus::Device)
        .collect();
    match online.as_slice() {
        [] => Err(AppError::dependency("No online adb devices found.", trace_id)),
        [device] => Ok(device.id.clone()),
        _ => {
            let serials = online
                .iter()
                .map(|device| device.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(AppError::validation(
                format!("Multiple online devices found ({serials}). Set ANDROID_SERIAL or pass --serial."),
                trace_id,
            ))
        }
    }
}

fn counting_emitter<T: 'static>(counter: &Arc<AtomicU64>) -> SampleEmitter<T> {
    let counter = Arc::clone(counter);
    Arc::new(move |_sample: T| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
}

fn print_summary(summary: &SmokeSummary, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }
    println!(
        "{} [{}] trace={} serial={} package={}",
        summary.tool,
        summary.status,
        summary.trace_id,
        summary.serial.as_deref().unwrap_or("-"),
        summary.package
    );
    for check in &summary.checks {
        match &check.error {
            Some(error) => println!("  {:<16} {} ({} ms): {error}", check.name, check.status, check.duration_ms),
            None => println!("  {:<16} {} ({} ms)", check.name, check.status, check.duration_ms),
        }
    }
    for (kind, count) in &summary.samples {
        println!("  samples {kind:<8} {count}");
    }
    println!("  buffered log entries {}", summary.buffered_log_entries);
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut summary = SmokeSummary {
        tool: "droid_telemetry_smoke",
        status: "fail",
        trace_id: trace_id.clone(),
        serial: args.serial.clone(),
        package: args.package.clone(),
        seconds: args.seconds,
        samples: BTreeMap::new(),
        buffered_log_entries: 0,
        checks: Vec::new(),
    };

    let Some(config) = run_check(&mut checks, "load_config", load_config) else {
        summary.checks = checks;
        print_summary(&summary, args.json);
        std::process::exit(1);
    };
    init_logging(&config.logging);

    let adb_ok = run_check(&mut checks, "check_adb", || {
        let info = check_adb(None, &config, Some(trace_id.clone()))?.data;
        if info.available {
            Ok(())
        } else {
            Err(AppError::dependency(
                info.error.unwrap_or_else(|| "adb unavailable".to_string()),
                &trace_id,
            ))
        }
    });
    let state = adb_ok.and_then(|_| {
        run_check(&mut checks, "init_state", || init_app_state(config.clone(), &trace_id))
    });
    let Some(state) = state else {
        summary.checks = checks;
        print_summary(&summary, args.json);
        std::process::exit(1);
    };

    let serial = match args.serial.clone() {
        Some(serial) => Some(serial),
        None => run_check(&mut checks, "pick_device", || pick_single_device(&state, &trace_id)),
    };
    let Some(serial) = serial else {
        summary.checks = checks;
        print_summary(&summary, args.json);
        std::process::exit(1);
    };
    summary.serial = Some(serial.clone());

    let log_count = Arc::new(AtomicU64::new(0));
    let counters: Vec<(&'static str, Arc<AtomicU64>)> = ["memory", "cpu", "fps", "battery", "gc", "network"]
        .into_iter()
        .map(|kind| (kind, Arc::new(AtomicU64::new(0))))
        .collect();
    let counter = |kind: &str| {
        counters
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, counter)| Arc::clone(counter))
            .unwrap_or_default()
    };
    let trace = || Some(trace_id.clone());
    let pkg = args.package.clone();

    let log_counter = Arc::clone(&log_count);
    run_check(&mut checks, "start_logcat", || {
        start_logcat(
            &state,
            serial.clone(),
            pkg.clone(),
            None,
            Arc::new(move |_entry| {
                log_counter.fetch_add(1, Ordering::Relaxed);
            }),
            trace(),
        )
    });
    run_check(&mut checks, "start_memory", || {
        start_memory_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("memory")), trace())
    });
    run_check(&mut checks, "start_cpu", || {
        start_cpu_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("cpu")), trace())
    });
    run_check(&mut checks, "start_fps", || {
        start_fps_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("fps")), trace())
    });
    run_check(&mut checks, "start_battery", || {
        start_battery_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("battery")), trace())
    });
    run_check(&mut checks, "start_gc", || {
        start_gc_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("gc")), trace())
    });
    run_check(&mut checks, "start_network", || {
        start_network_monitor(&state, serial.clone(), pkg.clone(), None, counting_emitter(&counter("network")), trace())
    });

    std::thread::sleep(Duration::from_secs(args.seconds));

    summary.buffered_log_entries = logcat_snapshot(&state, serial.clone(), pkg.clone(), trace())
        .map(|response| response.data.len())
        .unwrap_or_default();
    run_check(&mut checks, "close_session", || {
        close_session(&state, serial.clone(), pkg.clone(), trace())
    });

    summary.samples.insert("logcat", log_count.load(Ordering::Relaxed));
    for (kind, counter) in &counters {
        summary.samples.insert(*kind, counter.load(Ordering::Relaxed));
    }
    let failed = checks.iter().any(|check| check.status == "fail");
    let silent = summary.samples.values().all(|count| *count == 0);
    summary.status = match (failed, silent) {
        (true, _) => "fail",
        (false, true) => "warn",
        (false, false) => "pass",
    };
    summary.checks = checks;
    print_summary(&summary, args.json);
    if failed {
        std::process::exit(1);
    }
}
