//! Counting Semaphore
//!
//! # Design
//! The count lives in an `AtomicU32` so that [`Semaphore::try_wait`] and the
//! privileged [`Semaphore::su_signal`] never take a lock. Blocking waiters
//! sleep on a `parking_lot::Condvar` in bounded slices: a privileged signal
//! does not hold the lock while notifying, so a waiter that checked the count
//! just before the increment picks it up on its next slice instead of
//! sleeping forever.
//!
//! # Virtual time
//! On a thread that opted into simulated ticks, [`Semaphore::wait`]
//! acknowledges the current tick before blocking, and
//! [`Semaphore::timed_wait`] counts its timeout in ticks by looping on the
//! tick barrier. The `*_in_real_time` variants are never intercepted.

use crate::domain::elapsed;
use crate::domain::simtick::SimBinding;
use crate::infrastructure::host;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Largest count a semaphore can hold unless a lower bound is requested
pub const SEMAPHORE_MAX_COUNT: u32 = i32::MAX as u32;

const POLL_SLICE: Duration = Duration::from_millis(10);

/// Counting semaphore with saturating signal
#[derive(Debug)]
pub struct Semaphore {
    count: AtomicU32,
    max: u32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Semaphore {
    /// Create a semaphore with an initial count
    pub fn new(initial: u32) -> Self {
        Self::with_max(initial, SEMAPHORE_MAX_COUNT)
    }

    /// Create a semaphore whose count saturates at `max`
    pub fn with_max(initial: u32, max: u32) -> Self {
        let max = max.max(1);
        Self {
            count: AtomicU32::new(initial.min(max)),
            max,
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Current count (a snapshot)
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Saturation bound
    pub fn max_count(&self) -> u32 {
        self.max
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Producers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Increment the count and wake one waiter. Thread context only.
    pub fn signal(&self) {
        self.increment();
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    /// Privileged signal: same effect as [`Semaphore::signal`] but never
    /// blocks and never acquires a lock.
    pub fn su_signal(&self) {
        self.increment();
        self.cond.notify_one();
    }

    fn increment(&self) {
        let max = self.max;
        let saturated = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c < max).then_some(c + 1))
            .is_err();
        if saturated {
            tracing::trace!(max, "semaphore count saturated");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Consumers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Decrement the count if it is positive, without blocking
    pub fn try_wait(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    /// Block until the count is positive, then decrement it
    pub fn wait(&self) {
        if let Some(sim) = host::sim_binding() {
            sim.application_wait();
        }
        self.wait_in_real_time();
    }

    /// Wait up to `timeout_ms` milliseconds (ticks under virtual time).
    /// Returns `false` on timeout.
    pub fn timed_wait(&self, timeout_ms: u64) -> bool {
        match host::sim_binding() {
            Some(sim) => self.timed_wait_in_sim_time(&sim, timeout_ms),
            None => self.timed_wait_in_real_time(timeout_ms),
        }
    }

    /// [`Semaphore::wait`] that ignores virtual time
    pub fn wait_in_real_time(&self) {
        loop {
            if self.try_wait() {
                return;
            }
            let mut guard = self.lock.lock();
            if self.count() == 0 {
                self.cond.wait_for(&mut guard, POLL_SLICE);
            }
        }
    }

    /// [`Semaphore::timed_wait`] that ignores virtual time
    pub fn timed_wait_in_real_time(&self, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.try_wait() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut guard = self.lock.lock();
            if self.count() == 0 {
                self.cond.wait_for(&mut guard, (deadline - now).min(POLL_SLICE));
            }
        }
    }

    fn timed_wait_in_sim_time(&self, sim: &SimBinding, timeout_ms: u64) -> bool {
        let mut remaining = timeout_ms;
        loop {
            if self.try_wait() {
                return true;
            }
            if remaining == 0 {
                return false;
            }
            let start = sim.engine.current();
            sim.top_level_wait();
            let delta = elapsed::delta_milliseconds(start, sim.engine.current());
            remaining = remaining.saturating_sub(delta);
        }
    }
}
