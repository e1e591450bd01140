//! # Virtual Time (simulated ticks)
//!
//! Replaces the wall clock with a driver-controlled tick counter for the
//! threads that opt in, so timing-dependent multi-threaded code runs in
//! deterministic lock-step under test.
//!
//! # Overview
//! - [`SimTickEngine`]: the barrier itself (global counter, waiter set,
//!   `advance`).
//! - [`SimTickRecord`]: per-thread tick snapshot, release semaphore and
//!   pending-acknowledgement flag.
//! - [`SimBinding`]: the pair installed in a participating thread's context.
//!
//! Threads that did not opt in are unaffected: every intercept below is a
//! no-op for them and they fall through to real-time primitives.

pub mod engine;
pub mod record;

pub use engine::{SimTickConfig, SimTickEngine};
pub use record::SimTickRecord;

use crate::domain::elapsed;
use crate::infrastructure::host;
use std::sync::Arc;

/// Engine and record of one participating thread
#[derive(Debug, Clone)]
pub struct SimBinding {
    /// Engine shared by the runtime
    pub engine: Arc<SimTickEngine>,
    /// This thread's record
    pub record: Arc<SimTickRecord>,
}

impl SimBinding {
    /// Block until the next tick (see [`SimTickEngine::top_level_wait`])
    pub fn top_level_wait(&self) {
        self.engine.top_level_wait(&self.record);
    }

    /// Acknowledge the current tick before a non-tick wait
    pub fn application_wait(&self) {
        self.engine.application_wait(&self.record);
    }

    /// Sleep `ms` virtual milliseconds
    pub fn sleep(&self, mut ms: u64) {
        while ms > 0 {
            let start = self.engine.current();
            self.top_level_wait();
            let delta = elapsed::delta_milliseconds(start, self.engine.current());
            ms = ms.saturating_sub(delta);
        }
    }
}

/// Whether the calling thread runs on virtual time
pub fn using_sim_ticks() -> bool {
    host::sim_binding().is_some()
}

/// Block the calling participant until the next tick. No-op for other threads.
pub fn top_level_wait() {
    if let Some(binding) = host::sim_binding() {
        binding.top_level_wait();
    }
}

/// Acknowledge the current tick. No-op for non-participating threads.
pub fn application_wait() {
    if let Some(binding) = host::sim_binding() {
        binding.application_wait();
    }
}
