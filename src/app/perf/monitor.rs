use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::adb::runner::Bridge;
use crate::app::gate::EmitGate;
use crate::app::scheduler::TaskScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Memory,
    Cpu,
    Fps,
    Battery,
    Gc,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Memory,
        MetricKind::Cpu,
        MetricKind::Fps,
        MetricKind::Battery,
        MetricKind::Gc,
        MetricKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Memory => "memory",
            MetricKind::Cpu => "cpu",
            MetricKind::Fps => "fps",
            MetricKind::Battery => "battery",
            MetricKind::Gc => "gc",
            MetricKind::Network => "network",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll tick's fetch + parse. `None` means "no sample this tick", never an error.
pub trait MetricSampler: Send + 'static {
    type Sample: Send + 'static;

    fn kind(&self) -> MetricKind;

    fn sample(&mut self, bridge: &dyn Bridge, trace_id: &str) -> Option<Self::Sample>;
}

pub type SampleEmitter<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct MonitorContext {
    pub bridge: Arc<dyn Bridge>,
    pub scheduler: Arc<TaskScheduler>,
    pub gate: Arc<EmitGate>,
    pub interval: Duration,
    pub serial: String,
    pub trace_id: String,
}

/// Running poller. Dropping or stopping it signals the worker; an in-flight fetch is not
/// interrupted, its result is discarded by the emit gate.
pub struct MonitorHandle {
    kind: MetricKind,
    generation: u64,
    stop_flag: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signal_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the worker and waits for it to exit. Only for shutdown paths that can afford
    /// to wait out an in-flight bridge call.
    pub fn join(mut self) {
        self.signal_stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Starts a single worker for `sampler`. Ticks never overlap: a slow fetch delays the next
/// tick instead of running beside it.
pub fn spawn_monitor<S: MetricSampler>(
    mut sampler: S,
    ctx: MonitorContext,
    emitter: SampleEmitter<S::Sample>,
) -> MonitorHandle {
    let kind = sampler.kind();
    let generation = ctx.gate.advance();
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_worker = Arc::clone(&stop_flag);

    info!(
        trace_id = %ctx.trace_id,
        serial = %ctx.serial,
        kind = %kind,
        interval_ms = ctx.interval.as_millis() as u64,
        generation,
        "monitor started"
    );

    let join = std::thread::spawn(move || {
        let MonitorContext {
            bridge,
            scheduler,
            gate,
            interval,
            serial,
            trace_id,
        } = ctx;
        let mut ticks = 0u64;
        let mut emitted = 0u64;

        while !stop_worker.load(Ordering::Relaxed) {
            let tick_started = Instant::now();
            let sample = {
                let Some(_permit) = scheduler.acquire_tick(&stop_worker) else {
                    break;
                };
                sampler.sample(bridge.as_ref(), &trace_id)
            };
            ticks += 1;
            if stop_worker.load(Ordering::Relaxed) {
                break;
            }

            match sample {
                Some(sample) => {
                    if !gate.emit_if_current(generation, || emitter(sample)) {
                        break;
                    }
                    emitted += 1;
                }
                None => {
                    debug!(trace_id = %trace_id, serial = %serial, kind = %kind, "no sample this tick");
                }
            }

            sleep_with_stop(interval.saturating_sub(tick_started.elapsed()), &stop_worker);
        }

        debug!(
            trace_id = %trace_id,
            serial = %serial,
            kind = %kind,
            ticks,
            emitted,
            "monitor worker exited"
        );
    });

    MonitorHandle {
        kind,
        generation,
        stop_flag,
        join: Some(join),
    }
}

pub fn sleep_with_stop(duration: Duration, stop_flag: &AtomicBool) {
    let mut remaining = duration;
    let chunk = Duration::from_millis(25);
    while !remaining.is_zero() {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
