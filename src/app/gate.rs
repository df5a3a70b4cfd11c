use std::sync::Mutex;

/// Generation counter that decides whether a worker's result may still be delivered.
///
/// Every start/stop of a stream or monitor advances the generation. A worker captures the
/// generation it was started with and emits through `emit_if_current`, which holds the lock
/// across the callback: once `advance` returns, no callback from an older generation can
/// run. Callbacks must not advance their own gate.
#[derive(Debug, Default)]
pub struct EmitGate {
    generation: Mutex<u64>,
}

impl EmitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> u64 {
        let mut guard = self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = guard.wrapping_add(1);
        *guard
    }

    pub fn current(&self) -> u64 {
        *self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `emit` only if `generation` is still current. Returns whether it ran.
    pub fn emit_if_current(&self, generation: u64, emit: impl FnOnce()) -> bool {
        let guard = self
            .generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard != generation {
            return false;
        }
        emit();
        drop(guard);
        true
    }
}
