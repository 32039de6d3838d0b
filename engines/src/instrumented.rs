use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dotmatrix_core::engine::{CoreEngine, EngineError, InstanceHandle, NativeFrame};

/// Shared call counters for an [`Instrumented`] engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    instances_created: AtomicUsize,
    instances_released: AtomicUsize,
    buffers_produced: AtomicUsize,
    buffers_released: AtomicUsize,
    dumps: AtomicUsize,
    loads: AtomicUsize,
    failed_loads: AtomicUsize,
    resets: AtomicUsize,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub instances_created: usize,
    pub instances_released: usize,
    pub buffers_produced: usize,
    pub buffers_released: usize,
    pub dumps: usize,
    pub loads: usize,
    pub failed_loads: usize,
    pub resets: usize,
}

impl StatsSnapshot {
    pub const fn live_instances(&self) -> usize {
        self.instances_created - self.instances_released
    }

    /// Frames handed out and not yet returned.
    pub const fn live_buffers(&self) -> usize {
        self.buffers_produced - self.buffers_released
    }
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            instances_created: get(&self.instances_created),
            instances_released: get(&self.instances_released),
            buffers_produced: get(&self.buffers_produced),
            buffers_released: get(&self.buffers_released),
            dumps: get(&self.dumps),
            loads: get(&self.loads),
            failed_loads: get(&self.failed_loads),
            resets: get(&self.resets),
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Wraps an engine and counts every call that crosses its boundary.
///
/// The counters outlive the engine, so they can still be read after the
/// session that owned it has been torn down.
pub struct Instrumented<E> {
    inner: E,
    stats: Arc<EngineStats>,
}

impl<E: CoreEngine> Instrumented<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: CoreEngine> CoreEngine for Instrumented<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_instance(&mut self, rom: &[u8]) -> Result<InstanceHandle, EngineError> {
        let instance = self.inner.create_instance(rom)?;
        bump(&self.stats.instances_created);
        Ok(instance)
    }

    fn advance_to_vblank(&mut self, instance: &InstanceHandle, input: u8) -> NativeFrame {
        bump(&self.stats.buffers_produced);
        self.inner.advance_to_vblank(instance, input)
    }

    fn dump_state(&mut self, instance: &InstanceHandle) -> Result<Vec<u8>, EngineError> {
        bump(&self.stats.dumps);
        self.inner.dump_state(instance)
    }

    fn load_state(&mut self, instance: &InstanceHandle, state: &[u8]) -> Result<(), EngineError> {
        bump(&self.stats.loads);
        let result = self.inner.load_state(instance, state);
        if result.is_err() {
            bump(&self.stats.failed_loads);
        }
        result
    }

    fn reset_instance(&mut self, instance: &InstanceHandle) {
        bump(&self.stats.resets);
        self.inner.reset_instance(instance);
    }

    fn release_instance(&mut self, instance: InstanceHandle) {
        bump(&self.stats.instances_released);
        self.inner.release_instance(instance);
    }

    fn release_buffer(&mut self, buffer: NativeFrame) {
        bump(&self.stats.buffers_released);
        self.inner.release_buffer(buffer);
    }
}
