//! Tick-barrier engine
//!
//! # Design
//! One [`SimTickEngine`] per runtime holds the global tick counter (in
//! milliseconds), the carried-over tick remainder, and the set of
//! participating threads currently blocked on the next tick. All three sit
//! behind one short `parking_lot::Mutex` that is never held across a
//! blocking call.
//!
//! The driver thread calls [`SimTickEngine::advance`]. Ticks are applied in
//! fixed batches of `min_ticks_for_advance`; anything smaller is carried to
//! the next call. For each batch the driver:
//!
//! 1. drains stale acknowledgements from the shared tick-source semaphore,
//! 2. waits (bounded) until at least one participant is queued,
//! 3. bumps the counter and releases every queued participant,
//! 4. collects one acknowledgement per released participant.
//!
//! A released participant acknowledges at its next suspension point: when it
//! queues for the following tick, when it blocks in an application wait, or
//! when it exits.

use super::record::SimTickRecord;
use crate::domain::sync::Semaphore;
use crate::domain::thread::ThreadId;
use crate::infrastructure::{fatal, host};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning knobs of the tick barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTickConfig {
    /// Batch size; ticks are only applied in multiples of this
    pub min_ticks_for_advance: u64,
    /// Real-time window for detecting progress before `advance` gives up
    pub no_activity_limit: Duration,
    /// Real sleep between polls for queued participants
    pub yield_sleep: Duration,
}

impl Default for SimTickConfig {
    fn default() -> Self {
        Self {
            min_ticks_for_advance: 10,
            no_activity_limit: Duration::from_secs(2),
            yield_sleep: Duration::from_millis(1),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct TickState {
    milliseconds: u64,
    remaining_ticks: u64,
    waiters: VecDeque<Arc<SimTickRecord>>,
}

/// Virtual-time coordinator
#[derive(Debug)]
pub struct SimTickEngine {
    config: SimTickConfig,
    state: Mutex<TickState>,
    tick_source: Semaphore,
    participants: AtomicUsize,
}

impl SimTickEngine {
    /// Create an engine at tick 0
    pub fn new(mut config: SimTickConfig) -> Self {
        config.min_ticks_for_advance = config.min_ticks_for_advance.max(1);
        Self {
            config,
            state: Mutex::new(TickState::default()),
            tick_source: Semaphore::new(0),
            participants: AtomicUsize::new(0),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &SimTickConfig {
        &self.config
    }

    /// Global tick counter in milliseconds
    pub fn current(&self) -> u64 {
        self.state.lock().milliseconds
    }

    /// Global tick counter in whole seconds
    pub fn seconds(&self) -> u64 {
        self.current() / 1000
    }

    /// Ticks requested but not yet applied because they did not fill a batch
    pub fn remaining_ticks(&self) -> u64 {
        self.state.lock().remaining_ticks
    }

    /// Number of live participating threads
    pub fn participants(&self) -> usize {
        self.participants.load(Ordering::Acquire)
    }

    /// Number of participants currently blocked on the next tick
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Whether `thread_id` is currently blocked on the next tick
    pub fn is_waiting_on_next_tick(&self, thread_id: ThreadId) -> bool {
        self.state
            .lock()
            .waiters
            .iter()
            .any(|record| record.thread_id() == thread_id)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Driver side
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Advance virtual time by `ticks` milliseconds.
    ///
    /// Returns `false` when no participant queued for a tick, or a released
    /// participant failed to settle, within `no_activity_limit`. Ticks that
    /// were not applied are kept for the next call.
    ///
    /// Calling this from a participating thread is a fatal usage error.
    pub fn advance(&self, ticks: u64) -> bool {
        if host::sim_binding().is_some() {
            fatal::raise("SimTick::advance() called from a thread that uses simulated ticks");
        }

        let batch = self.config.min_ticks_for_advance;
        let mut num_ticks = {
            let mut state = self.state.lock();
            ticks.saturating_add(std::mem::take(&mut state.remaining_ticks))
        };

        while num_ticks >= batch {
            num_ticks -= batch;

            while self.tick_source.try_wait() {}

            if !self.wait_for_waiters() {
                self.state.lock().remaining_ticks = num_ticks + batch;
                warn!(
                    tick = self.current(),
                    "advance stalled: no participating thread is waiting on the next tick"
                );
                return false;
            }

            let (tick, released) = {
                let mut state = self.state.lock();
                state.milliseconds += batch;
                let released = Self::wake_up_waiters(&mut state);
                (state.milliseconds, released)
            };
            debug!(tick, released, "advanced simulated time");

            let limit_ms = self.config.no_activity_limit.as_millis() as u64;
            for pending in (1..=released).rev() {
                if !self.tick_source.timed_wait_in_real_time(limit_ms) {
                    self.state.lock().remaining_ticks = num_ticks;
                    warn!(tick, pending, "advance stalled: released threads did not settle");
                    return false;
                }
            }
        }

        self.state.lock().remaining_ticks = num_ticks;
        true
    }

    fn wait_for_waiters(&self) -> bool {
        let deadline = Instant::now() + self.config.no_activity_limit;
        loop {
            if !self.state.lock().waiters.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.config.yield_sleep);
        }
    }

    fn wake_up_waiters(state: &mut TickState) -> usize {
        let mut released = 0;
        while let Some(record) = state.waiters.pop_front() {
            record.mark_ack_pending();
            record.waiter.signal();
            released += 1;
        }
        released
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Participant side
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Allocate the record for a thread entering virtual time
    pub fn thread_init(&self, thread_id: ThreadId) -> Arc<SimTickRecord> {
        let now = self.current();
        self.participants.fetch_add(1, Ordering::AcqRel);
        trace!(thread = %thread_id, tick = now, "thread joined simulated time");
        Arc::new(SimTickRecord::new(thread_id, now))
    }

    /// Retire a participant, acknowledging any tick it was processing
    pub fn on_thread_exit(&self, record: &SimTickRecord) {
        {
            let mut state = self.state.lock();
            state
                .waiters
                .retain(|queued| queued.thread_id() != record.thread_id());
        }
        self.acknowledge(record);
        self.participants.fetch_sub(1, Ordering::AcqRel);
        trace!(thread = %record.thread_id(), "thread left simulated time");
    }

    /// Block until the next tick unless this thread has not yet consumed the
    /// newest one
    pub fn top_level_wait(&self, record: &Arc<SimTickRecord>) {
        if let Some(ack) = self.test_and_queue(record) {
            if ack {
                self.tick_source.signal();
            }
            record.waiter.wait_in_real_time();
        }
    }

    /// Acknowledge the current tick before blocking for a non-tick reason
    pub fn application_wait(&self, record: &SimTickRecord) {
        self.acknowledge(record);
    }

    /// Queue the record if it is current. The pending acknowledgement is
    /// taken under the tick lock: once queued, the driver may mark the record
    /// again for the next tick.
    fn test_and_queue(&self, record: &Arc<SimTickRecord>) -> Option<bool> {
        let mut state = self.state.lock();
        if record.cur_ticks() == state.milliseconds {
            state.waiters.push_back(Arc::clone(record));
            return Some(record.take_ack_pending());
        }
        record.set_cur_ticks(state.milliseconds);
        None
    }

    fn acknowledge(&self, record: &SimTickRecord) {
        if record.take_ack_pending() {
            self.tick_source.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(limit_ms: u64) -> Arc<SimTickEngine> {
        Arc::new(SimTickEngine::new(SimTickConfig {
            min_ticks_for_advance: 10,
            no_activity_limit: Duration::from_millis(limit_ms),
            yield_sleep: Duration::from_millis(1),
        }))
    }

    #[test]
    fn test_partial_batch_is_carried() {
        let engine = engine(50);
        assert!(engine.advance(5));
        assert!(engine.advance(4));
        assert_eq!(engine.current(), 0);
        assert_eq!(engine.remaining_ticks(), 9);
    }

    #[test]
    fn test_advance_stalls_without_waiters() {
        let engine = engine(30);
        assert!(!engine.advance(10));
        assert_eq!(engine.current(), 0);
        assert_eq!(engine.remaining_ticks(), 10);
    }

    #[test]
    fn test_huge_request_saturates_with_carried_remainder() {
        let engine = engine(20);
        assert!(engine.advance(5));
        assert!(!engine.advance(u64::MAX));
        assert_eq!(engine.current(), 0);
        assert_eq!(engine.remaining_ticks(), u64::MAX);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let engine = SimTickEngine::new(SimTickConfig {
            min_ticks_for_advance: 0,
            ..SimTickConfig::default()
        });
        assert_eq!(engine.config().min_ticks_for_advance, 1);
    }

    #[test]
    fn test_release_and_acknowledge() {
        let engine = engine(2_000);
        let worker = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let record = engine.thread_init(ThreadId::new(1));
                engine.top_level_wait(&record);
                let seen = engine.current();
                // Refreshes the snapshot without blocking
                engine.top_level_wait(&record);
                engine.on_thread_exit(&record);
                seen
            })
        };

        while !engine.is_waiting_on_next_tick(ThreadId::new(1)) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(engine.participants(), 1);
        assert!(engine.advance(10));
        assert_eq!(worker.join().expect("worker panicked"), 10);
        assert_eq!(engine.current(), 10);
        assert_eq!(engine.participants(), 0);
        assert_eq!(engine.seconds(), 0);
    }
}
