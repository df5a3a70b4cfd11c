use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::apps::{monkey_launch_failure, parse_pm_list_packages_output, pm_clear_failure};
use crate::app::adb::locator::{normalize_command_path, resolve_adb_program, validate_adb_program};
use crate::app::adb::parse::{parse_adb_devices, parse_getprop_value};
use crate::app::adb::runner::{device_args, read_stdout, run_checked, AdbBridge, Bridge};
use crate::app::config::{
    clamp_interval_ms, load_config, save_config, validate_config, MonitorSettings, TelemetryConfig,
};
use crate::app::error::AppError;
use crate::app::logcat::stream::LogEmitter;
use crate::app::models::{
    AdbInfo, BatteryInfo, CommandResponse, CommandResult, CpuInfo, Device, DeviceStatus, FpsInfo,
    GcInfo, LogEntry, MemoryInfo, NetworkInfo,
};
use crate::app::perf::monitor::{MetricKind, MetricSampler, SampleEmitter};
use crate::app::perf::samplers::{
    BatterySampler, CpuSampler, FpsSampler, GcSampler, MemorySampler, NetworkSampler,
};
use crate::app::state::{AppState, TelemetrySession};


fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

/// Config helpers report errors without a trace id; attach the command's.
fn with_trace(err: AppError, trace_id: &str) -> AppError {
    AppError::new(err.code, err.error, trace_id)
}

fn default_interval_ms(settings: &MonitorSettings, kind: MetricKind) -> u64 {
    match kind {
        MetricKind::Memory => settings.memory_interval_ms,
        MetricKind::Cpu => settings.cpu_interval_ms,
        MetricKind::Fps => settings.fps_interval_ms,
        MetricKind::Battery => settings.battery_interval_ms,
        MetricKind::Gc => settings.gc_interval_ms,
        MetricKind::Network => settings.network_interval_ms,
    }
}

fn resolve_interval_ms(settings: &MonitorSettings, kind: MetricKind, input: Option<u64>) -> u64 {
    clamp_interval_ms(input.unwrap_or_else(|| default_interval_ms(settings, kind)))
}

/// Resolves and validates the adb binary named by `config`, then builds the shared state.
pub fn init_app_state(config: TelemetryConfig, trace_id: &str) -> Result<AppState, AppError> {
    let config = validate_config(config);
    let program = resolve_adb_program(&config.bridge.command_path);
    validate_adb_program(&program).map_err(|message| AppError::validation(message, trace_id))?;
    info!(trace_id = %trace_id, program = %program, "adb bridge ready");

    let bridge = AdbBridge::new(
        program,
        Duration::from_millis(config.bridge.command_timeout_ms),
    );
    Ok(AppState::new(Arc::new(bridge), config))
}

pub fn get_config(trace_id: Option<String>) -> Result<CommandResponse<TelemetryConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config().map_err(|err| with_trace(err, &trace_id))?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn save_app_config(
    config: TelemetryConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<TelemetryConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = validate_config(config);
    save_config(&config).map_err(|err| with_trace(err, &trace_id))?;
    info!(trace_id = %trace_id, "config saved");
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn reset_config(trace_id: Option<String>) -> Result<CommandResponse<TelemetryConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = TelemetryConfig::default();
    save_config(&config).map_err(|err| with_trace(err, &trace_id))?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

/// Probes an adb binary with `adb version`. Problems are reported in the payload, not as
/// errors.
pub fn check_adb(
    command_path: Option<String>,
    config: &TelemetryConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<AdbInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "check_adb");

    let program = command_path
        .as_deref()
        .map(normalize_command_path)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| resolve_adb_program(&config.bridge.command_path));
    let unavailable = |program: String, message: String| CommandResponse {
        trace_id: trace_id.clone(),
        data: AdbInfo {
            available: false,
            version_output: String::new(),
            command_path: program,
            error: Some(message),
        },
    };

    if let Err(message) = validate_adb_program(&program) {
        warn!(trace_id = %trace_id, error = %message, "adb validation failed");
        return Ok(unavailable(program, message));
    }

    let bridge = AdbBridge::new(program.clone(), Duration::from_secs(5));
    let output = match bridge.run(&["version".to_string()], &trace_id) {
        Ok(output) => output,
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err.error, "adb check failed");
            return Ok(unavailable(program, err.error));
        }
    };

    let available = output.success();
    let stderr = output.stderr.trim().to_string();
    let version_output = [output.stdout.trim(), stderr.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    Ok(CommandResponse {
        trace_id,
        data: AdbInfo {
            available,
            version_output,
            command_path: program,
            error: match (available, stderr.is_empty()) {
                (true, _) => None,
                (false, true) => Some("ADB command returned a non-zero exit code".to_string()),
                (false, false) => Some(stderr),
            },
        },
    })
}

/// `devices -l` plus model and OS version for every authorized device. A failed listing
/// degrades to an empty list; a failed property lookup leaves that field empty.
pub fn list_devices(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<Device>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "list_devices");

    let bridge = state.bridge.as_ref();
    let args = vec!["devices".to_string(), "-l".to_string()];
    let Some(output) = read_stdout(bridge, &args, &trace_id) else {
        return Ok(CommandResponse {
            trace_id,
            data: Vec::new(),
        });
    };

    let devices = parse_adb_devices(&output)
        .into_iter()
        .map(|listing| {
            if listing.status != DeviceStatus::Device {
                return listing.into_device(None, None);
            }
            let getprop = |key: &str| {
                let args = device_args(&listing.serial, &["shell", "getprop", key]);
                read_stdout(bridge, &args, &trace_id).and_then(|out| parse_getprop_value(&out))
            };
            let model = getprop("ro.product.model");
            let os_version = getprop("ro.build.version.release");
            listing.into_device(model, os_version)
        })
        .collect();

    Ok(CommandResponse {
        trace_id,
        data: devices,
    })
}

pub fn list_packages(
    state: &AppState,
    serial: String,
    third_party_only: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;

    let mut rest = vec!["shell", "pm", "list", "packages"];
    if third_party_only {
        rest.push("-3");
    }
    let args = device_args(&serial, &rest);
    let packages = read_stdout(state.bridge.as_ref(), &args, &trace_id)
        .map(|output| parse_pm_list_packages_output(&output))
        .unwrap_or_default();

    Ok(CommandResponse {
        trace_id,
        data: packages,
    })
}

/// Runs a mutating device command under the scheduler's permit and the device lock.
fn run_mutating(
    state: &AppState,
    serial: &str,
    rest: &[&str],
    trace_id: &str,
) -> Result<CommandResult, AppError> {
    let args = device_args(serial, rest);
    let output = state
        .scheduler
        .run_exclusive(serial, || run_checked(state.bridge.as_ref(), &args, trace_id))?;
    Ok(CommandResult {
        serial: serial.to_string(),
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
    })
}

pub fn launch_app(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<CommandResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;
    ensure_non_empty(&package_name, "package_name", &trace_id)?;
    info!(trace_id = %trace_id, serial = %serial, package = %package_name, "launch_app");

    let result = run_mutating(
        state,
        &serial,
        &[
            "shell",
            "monkey",
            "-p",
            &package_name,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ],
        &trace_id,
    )?;
    if let Some(reason) = monkey_launch_failure(&result.stdout) {
        return Err(AppError::dependency(
            format!("Failed to launch {package_name}: {reason}"),
            &trace_id,
        ));
    }

    Ok(CommandResponse {
        trace_id,
        data: result,
    })
}

pub fn force_stop_app(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;
    ensure_non_empty(&package_name, "package_name", &trace_id)?;
    info!(trace_id = %trace_id, serial = %serial, package = %package_name, "force_stop_app");

    run_mutating(state, &serial, &["shell", "am", "force-stop", &package_name], &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn clear_app_data(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;
    ensure_non_empty(&package_name, "package_name", &trace_id)?;
    info!(trace_id = %trace_id, serial = %serial, package = %package_name, "clear_app_data");

    let result = run_mutating(state, &serial, &["shell", "pm", "clear", &package_name], &trace_id)?;
    if let Some(reason) = pm_clear_failure(&result.stdout) {
        return Err(AppError::dependency(
            format!("Failed to clear data for {package_name}: {reason}"),
            &trace_id,
        ));
    }
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn clear_logcat(
    state: &AppState,
    serial: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;

    run_mutating(state, &serial, &["logcat", "-c"], &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

fn validated_session(
    state: &AppState,
    serial: &str,
    package_name: &str,
    trace_id: &str,
) -> Result<Arc<TelemetrySession>, AppError> {
    ensure_non_empty(serial, "serial", trace_id)?;
    ensure_non_empty(package_name, "package_name", trace_id)?;
    Ok(state.session(serial, package_name))
}

fn existing_session(
    state: &AppState,
    serial: &str,
    package_name: &str,
    trace_id: &str,
) -> Result<Option<Arc<TelemetrySession>>, AppError> {
    ensure_non_empty(serial, "serial", trace_id)?;
    ensure_non_empty(package_name, "package_name", trace_id)?;
    Ok(state.existing_session(serial, package_name))
}

/// Starts (or restarts) the session's log stream. Empty or missing filters use the
/// configured defaults.
pub fn start_logcat(
    state: &AppState,
    serial: String,
    package_name: String,
    filters: Option<Vec<String>>,
    emitter: LogEmitter,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    session.start_logcat(&filters.unwrap_or_default(), emitter, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn stop_logcat(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let stopped = existing_session(state, &serial, &package_name, &trace_id)?
        .map(|session| session.stop_logcat())
        .unwrap_or(false);
    Ok(CommandResponse {
        trace_id,
        data: stopped,
    })
}

pub fn pause_logcat(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    session.pause_logcat();
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

pub fn resume_logcat(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let resumed = existing_session(state, &serial, &package_name, &trace_id)?
        .map(|session| {
            let was_paused = session.is_logcat_paused();
            session.resume_logcat();
            was_paused
        })
        .unwrap_or(false);
    Ok(CommandResponse {
        trace_id,
        data: resumed,
    })
}

/// Buffered log entries, newest first.
pub fn logcat_snapshot(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<LogEntry>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let entries = existing_session(state, &serial, &package_name, &trace_id)?
        .map(|session| session.logcat_snapshot())
        .unwrap_or_default();
    Ok(CommandResponse {
        trace_id,
        data: entries,
    })
}

fn start_monitor_inner<S: MetricSampler>(
    session: &TelemetrySession,
    sampler: S,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<S::Sample>,
    trace_id: String,
) -> Result<CommandResponse<bool>, AppError> {
    let interval_ms = resolve_interval_ms(&session.config().monitor, sampler.kind(), interval_ms);
    session.start_monitor(sampler, interval_ms, emitter, &trace_id);
    Ok(CommandResponse {
        trace_id,
        data: true,
    })
}

fn stop_monitor_inner(
    state: &AppState,
    serial: &str,
    package_name: &str,
    kind: MetricKind,
    trace_id: String,
) -> Result<CommandResponse<bool>, AppError> {
    let stopped = existing_session(state, serial, package_name, &trace_id)?
        .map(|session| session.stop_monitor(kind, &trace_id))
        .unwrap_or(false);
    Ok(CommandResponse {
        trace_id,
        data: stopped,
    })
}

pub fn start_memory_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<MemoryInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let sampler = MemorySampler::new(session.serial(), session.package());
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_memory_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Memory, trace_id)
}

pub fn start_cpu_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<CpuInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let sampler = CpuSampler::new(session.serial(), session.package());
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_cpu_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Cpu, trace_id)
}

pub fn start_fps_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<FpsInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let settle = Duration::from_millis(session.config().monitor.fps_settle_delay_ms);
    let sampler = FpsSampler::new(session.serial(), session.package(), settle);
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_fps_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Fps, trace_id)
}

pub fn start_battery_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<BatteryInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let sampler = BatterySampler::new(session.serial());
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_battery_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Battery, trace_id)
}

pub fn start_gc_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<GcInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let sampler = GcSampler::new(
        session.serial(),
        session.package(),
        session.config().monitor.gc_log_window,
    );
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_gc_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Gc, trace_id)
}

pub fn start_network_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    interval_ms: Option<u64>,
    emitter: SampleEmitter<NetworkInfo>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let session = validated_session(state, &serial, &package_name, &trace_id)?;
    let sampler = NetworkSampler::new(session.serial(), session.package());
    start_monitor_inner(&session, sampler, interval_ms, emitter, trace_id)
}

pub fn stop_network_monitor(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    stop_monitor_inner(state, &serial, &package_name, MetricKind::Network, trace_id)
}

/// Stops everything the session runs and forgets it.
pub fn close_session(
    state: &AppState,
    serial: String,
    package_name: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&serial, "serial", &trace_id)?;
    ensure_non_empty(&package_name, "package_name", &trace_id)?;
    let closed = state.close_session(&serial, &package_name, &trace_id);
    Ok(CommandResponse {
        trace_id,
        data: closed,
    })
}
