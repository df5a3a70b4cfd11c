use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use crate::app::adb::runner::Bridge;
use crate::app::config::{clamp_interval_ms, TelemetryConfig};
use crate::app::error::AppError;
use crate::app::gate::EmitGate;
use crate::app::logcat::buffer::PauseBuffer;
use crate::app::logcat::stream::{LogEmitter, LogStreamer};
use crate::app::models::LogEntry;
use crate::app::perf::monitor::{
    spawn_monitor, MetricKind, MetricSampler, MonitorContext, MonitorHandle, SampleEmitter,
};
use crate::app::scheduler::TaskScheduler;

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `handle` serializes start/stop of one kind and is held while the gate advances, so
/// queries read `running` instead.
struct MonitorSlot {
    gate: Arc<EmitGate>,
    handle: Mutex<Option<MonitorHandle>>,
    running: AtomicBool,
}

impl MonitorSlot {
    fn new() -> Self {
        Self {
            gate: Arc::new(EmitGate::new()),
            handle: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

/// Telemetry for one device + package: a log stream with its consumer buffer and at most
/// one poller per metric kind.
///
/// Every kind has its own lock and emit gate, so a callback of one kind may start or stop
/// other kinds. A callback must not start or stop its own kind. Status queries never take
/// those locks and are safe from any callback.
pub struct TelemetrySession {
    serial: String,
    package: String,
    bridge: Arc<dyn Bridge>,
    scheduler: Arc<TaskScheduler>,
    config: TelemetryConfig,
    streamer: Mutex<LogStreamer>,
    streaming: AtomicBool,
    log_buffer: Arc<Mutex<PauseBuffer<LogEntry>>>,
    monitors: HashMap<MetricKind, MonitorSlot>,
}

impl TelemetrySession {
    pub fn new(
        serial: impl Into<String>,
        package: impl Into<String>,
        bridge: Arc<dyn Bridge>,
        scheduler: Arc<TaskScheduler>,
        config: TelemetryConfig,
    ) -> Self {
        let serial = serial.into();
        let monitors = MetricKind::ALL
            .iter()
            .map(|kind| (*kind, MonitorSlot::new()))
            .collect();
        Self {
            streamer: Mutex::new(LogStreamer::new(serial.clone(), Arc::clone(&bridge))),
            streaming: AtomicBool::new(false),
            log_buffer: Arc::new(Mutex::new(PauseBuffer::new(config.logcat.max_lines))),
            serial,
            package: package.into(),
            bridge,
            scheduler,
            config,
            monitors,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    fn slot(&self, kind: MetricKind) -> &MonitorSlot {
        // Every kind is inserted in `new`.
        &self.monitors[&kind]
    }

    /// Starts `sampler`, replacing a running poller of the same kind.
    pub fn start_monitor<S: MetricSampler>(
        &self,
        sampler: S,
        interval_ms: u64,
        emitter: SampleEmitter<S::Sample>,
        trace_id: &str,
    ) {
        let kind = sampler.kind();
        let slot = self.slot(kind);
        let mut handle = lock_recover(&slot.handle);
        if let Some(previous) = handle.take() {
            slot.running.store(false, Ordering::SeqCst);
            slot.gate.advance();
            previous.signal_stop();
            info!(trace_id = %trace_id, serial = %self.serial, kind = %kind, "replacing running monitor");
        }

        let interval = Duration::from_millis(clamp_interval_ms(interval_ms));
        let ctx = MonitorContext {
            bridge: Arc::clone(&self.bridge),
            scheduler: Arc::clone(&self.scheduler),
            gate: Arc::clone(&slot.gate),
            interval,
            serial: self.serial.clone(),
            trace_id: trace_id.to_string(),
        };
        *handle = Some(spawn_monitor(sampler, ctx, emitter));
        slot.running.store(true, Ordering::SeqCst);
    }

    /// Stops the poller of `kind`. Returns `false` when none was running. No callback of
    /// that kind runs after this returns.
    pub fn stop_monitor(&self, kind: MetricKind, trace_id: &str) -> bool {
        let slot = self.slot(kind);
        let mut handle = lock_recover(&slot.handle);
        let Some(running) = handle.take() else {
            return false;
        };
        slot.running.store(false, Ordering::SeqCst);
        slot.gate.advance();
        running.signal_stop();
        info!(trace_id = %trace_id, serial = %self.serial, kind = %kind, "monitor stopped");
        true
    }

    pub fn is_monitor_running(&self, kind: MetricKind) -> bool {
        self.slot(kind).running.load(Ordering::SeqCst)
    }

    pub fn running_monitors(&self) -> Vec<MetricKind> {
        MetricKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.is_monitor_running(*kind))
            .collect()
    }

    /// Starts (or restarts) the log stream. Empty `filters` fall back to the configured
    /// defaults. Every entry is recorded in the session buffer before `emitter` sees it.
    pub fn start_logcat(
        &self,
        filters: &[String],
        emitter: LogEmitter,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let filters: &[String] = if filters.iter().all(|spec| spec.trim().is_empty()) {
            &self.config.logcat.default_filters
        } else {
            filters
        };
        let buffer = Arc::clone(&self.log_buffer);
        let recording: LogEmitter = Arc::new(move |entry: LogEntry| {
            lock_recover(&buffer).push(entry.clone());
            emitter(entry);
        });
        let mut streamer = lock_recover(&self.streamer);
        self.streaming.store(false, Ordering::SeqCst);
        streamer.start(filters, recording, trace_id)?;
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop_logcat(&self) -> bool {
        let mut streamer = lock_recover(&self.streamer);
        self.streaming.store(false, Ordering::SeqCst);
        streamer.stop()
    }

    pub fn is_logcat_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn pause_logcat(&self) {
        lock_recover(&self.log_buffer).pause();
    }

    pub fn resume_logcat(&self) {
        lock_recover(&self.log_buffer).resume();
    }

    pub fn is_logcat_paused(&self) -> bool {
        lock_recover(&self.log_buffer).is_paused()
    }

    /// Visible buffered entries, newest first.
    pub fn logcat_snapshot(&self) -> Vec<LogEntry> {
        lock_recover(&self.log_buffer).snapshot()
    }

    pub fn clear_log_buffer(&self) {
        lock_recover(&self.log_buffer).clear();
    }

    /// Stops the log stream and every poller.
    pub fn shutdown(&self, trace_id: &str) {
        self.stop_logcat();
        for kind in MetricKind::ALL {
            self.stop_monitor(kind, trace_id);
        }
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.shutdown("session-drop");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub serial: String,
    pub package: String,
}

impl SessionKey {
    pub fn new(serial: &str, package: &str) -> Self {
        Self {
            serial: serial.trim().to_string(),
            package: package.trim().to_string(),
        }
    }
}

/// Process-wide state shared by the command layer: one bridge, one scheduler and the
/// sessions keyed by serial + package.
pub struct AppState {
    pub bridge: Arc<dyn Bridge>,
    pub scheduler: Arc<TaskScheduler>,
    pub config: TelemetryConfig,
    sessions: Mutex<HashMap<SessionKey, Arc<TelemetrySession>>>,
}

impl AppState {
    pub fn new(bridge: Arc<dyn Bridge>, config: TelemetryConfig) -> Self {
        Self {
            scheduler: Arc::new(TaskScheduler::new(config.bridge.max_concurrent_commands)),
            bridge,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self, serial: &str, package: &str) -> Arc<TelemetrySession> {
        let key = SessionKey::new(serial, package);
        let mut sessions = lock_recover(&self.sessions);
        let session = sessions.entry(key.clone()).or_insert_with(|| {
            Arc::new(TelemetrySession::new(
                key.serial,
                key.package,
                Arc::clone(&self.bridge),
                Arc::clone(&self.scheduler),
                self.config.clone(),
            ))
        });
        Arc::clone(session)
    }

    pub fn existing_session(&self, serial: &str, package: &str) -> Option<Arc<TelemetrySession>> {
        lock_recover(&self.sessions)
            .get(&SessionKey::new(serial, package))
            .cloned()
    }

    /// Removes the session and stops everything it runs.
    pub fn close_session(&self, serial: &str, package: &str, trace_id: &str) -> bool {
        let removed = lock_recover(&self.sessions).remove(&SessionKey::new(serial, package));
        match removed {
            Some(session) => {
                session.shutdown(trace_id);
                true
            }
            None => false,
        }
    }

    pub fn session_keys(&self) -> Vec<SessionKey> {
        lock_recover(&self.sessions).keys().cloned().collect()
    }

    pub fn shutdown(&self, trace_id: &str) {
        let sessions: Vec<_> = lock_recover(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown(trace_id);
        }
    }
}
