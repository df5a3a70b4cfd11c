use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often a cancellable wait rechecks its flag.
const CANCEL_POLL: Duration = Duration::from_millis(25);

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counts `adb` invocations in flight across every session.
pub struct BridgeSemaphore {
    limit: usize,
    used: Mutex<usize>,
    cv: Condvar,
}

impl BridgeSemaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        *lock_recover(&self.used)
    }

    /// Waits for a slot. Gives up with `None` once `cancel` is set, so a stopped poller
    /// queued behind slow commands exits without ever touching the bridge.
    pub fn acquire_unless(self: &Arc<Self>, cancel: &AtomicBool) -> Option<BridgePermit> {
        let mut used = lock_recover(&self.used);
        while *used >= self.limit {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            used = self
                .cv
                .wait_timeout(used, CANCEL_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        *used += 1;
        Some(BridgePermit {
            semaphore: Arc::clone(self),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> BridgePermit {
        let never = AtomicBool::new(false);
        loop {
            if let Some(permit) = self.acquire_unless(&never) {
                return permit;
            }
        }
    }

    fn release(&self) {
        let mut used = lock_recover(&self.used);
        *used = used.saturating_sub(1);
        self.cv.notify_one();
    }
}

pub struct BridgePermit {
    semaphore: Arc<BridgeSemaphore>,
}

impl Drop for BridgePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Shared by every session. Poller ticks take one bridge permit each; mutating app commands
/// also hold the device's lock for their whole run.
pub struct TaskScheduler {
    global: Arc<BridgeSemaphore>,
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_commands: usize) -> Self {
        Self {
            global: Arc::new(BridgeSemaphore::new(max_concurrent_commands)),
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire_global(&self) -> BridgePermit {
        self.global.acquire()
    }

    /// Permit for one poller tick, or `None` when `stop` is set before a slot frees up.
    pub fn acquire_tick(&self, stop: &AtomicBool) -> Option<BridgePermit> {
        self.global.acquire_unless(stop)
    }

    pub fn in_flight(&self) -> usize {
        self.global.in_use()
    }

    fn device_lock(&self, serial: &str) -> Arc<Mutex<()>> {
        let mut guard = lock_recover(&self.device_locks);
        guard
            .entry(serial.trim().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `task` under the device lock for `serial`, then a bridge permit.
    ///
    /// The lock is taken first: commands queued on a busy device do not sit on permits the
    /// pollers of other devices need.
    pub fn run_exclusive<T>(&self, serial: &str, task: impl FnOnce() -> T) -> T {
        let lock = self.device_lock(serial);
        let _guard = lock_recover(&lock);
        let _permit = self.acquire_global();
        task()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn track_peak(running: &AtomicUsize, peak: &AtomicUsize) {
        let current = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        running.fetch_sub(1, Ordering::SeqCst);
    }

    #[test]
    fn bridge_permits_bound_concurrency() {
        let scheduler = Arc::new(TaskScheduler::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = scheduler.acquire_global();
                    track_peak(&running, &peak);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn run_exclusive_serializes_one_device() {
        let scheduler = Arc::new(TaskScheduler::new(8));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    scheduler.run_exclusive("emulator-5554", || track_peak(&running, &peak));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_tick_gives_up_while_bridge_is_saturated() {
        let scheduler = Arc::new(TaskScheduler::new(1));
        let held = scheduler.acquire_global();
        let stop = Arc::new(AtomicBool::new(false));

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            let stop = Arc::clone(&stop);
            thread::spawn(move || scheduler.acquire_tick(&stop).is_some())
        };
        thread::sleep(Duration::from_millis(60));
        stop.store(true, Ordering::SeqCst);

        assert!(!waiter.join().expect("join"));
        assert_eq!(scheduler.in_flight(), 1);
        drop(held);
        assert_eq!(scheduler.in_flight(), 0);
        assert!(scheduler.acquire_tick(&AtomicBool::new(false)).is_some());
    }

    #[test]
    fn queued_device_commands_do_not_hold_permits() {
        let scheduler = Arc::new(TaskScheduler::new(2));
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let release = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let started_tx = started_tx.clone();
                let release = Arc::clone(&release);
                thread::spawn(move || {
                    scheduler.run_exclusive("emulator-5554", || {
                        let _ = started_tx.send(());
                        while !release.load(Ordering::SeqCst) {
                            thread::sleep(Duration::from_millis(5));
                        }
                    });
                })
            })
            .collect();

        started_rx.recv().expect("first command running");
        thread::sleep(Duration::from_millis(50));
        // One command runs, two wait on the device lock; a poller still gets a slot.
        assert_eq!(scheduler.in_flight(), 1);
        let tick = scheduler.acquire_tick(&AtomicBool::new(false));
        assert!(tick.is_some());
        drop(tick);

        release.store(true, Ordering::SeqCst);
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn zero_limit_still_admits_one_command() {
        let semaphore = Arc::new(BridgeSemaphore::new(0));
        assert_eq!(semaphore.limit(), 1);
        let permit = semaphore.acquire();
        assert_eq!(semaphore.in_use(), 1);
        drop(permit);
        assert_eq!(semaphore.in_use(), 0);
    }
}
