//! Software timer manager
//!
//! # Design
//! Active timers sit in a `BinaryHeap` keyed by absolute deadline, with a
//! sequence number breaking ties so timers that expire together fire in the
//! order they were started. Each slot carries a generation counter; `start`
//! and `stop` bump it, and heap entries whose generation no longer matches
//! are discarded when popped. Stopping is therefore O(1) and a stopped timer
//! can never fire.
//!
//! Callbacks run with the manager lock released, so they may start or stop
//! any timer (including their own). Timers started while a processing pass
//! is running are staged and only become eligible after the pass ends.

use super::types::{ScheduledTimer, TimerId};
use crate::domain::elapsed;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use tracing::trace;

/// Timer expiry callback
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// Millisecond time source
pub type NowFn = Box<dyn Fn() -> u64 + Send + Sync>;

struct TimerSlot {
    callback: Option<TimerCallback>,
    generation: u64,
    deadline: Option<u64>,
}

#[derive(Default)]
struct TimerState {
    queue: BinaryHeap<ScheduledTimer>,
    staged: Vec<ScheduledTimer>,
    slots: HashMap<TimerId, TimerSlot>,
    in_tick: bool,
    next_id: u64,
    next_seq: u64,
    time_mark: u64,
}

impl TimerState {
    fn pop_due(&mut self, now: u64) -> Option<TimerId> {
        while let Some(top) = self.queue.peek() {
            if top.deadline > now {
                return None;
            }
            let entry = self.queue.pop()?;
            let live = self
                .slots
                .get(&entry.id)
                .is_some_and(|slot| slot.generation == entry.generation && slot.deadline.is_some());
            if live {
                return Some(entry.id);
            }
        }
        None
    }
}

/// Cooperative software-timer scheduler owned by one event loop
pub struct TimerManager {
    state: Mutex<TimerState>,
    now: NowFn,
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerManager")
            .field("timers", &state.slots.len())
            .field("queued", &state.queue.len())
            .field("in_tick", &state.in_tick)
            .finish()
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    /// Manager reading [`elapsed::milliseconds`]
    pub fn new() -> Self {
        Self::with_time_source(Box::new(elapsed::milliseconds))
    }

    /// Manager reading an explicit time source
    pub fn with_time_source(now: NowFn) -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            now,
        }
    }

    /// Current time as seen by this manager
    pub fn now(&self) -> u64 {
        (self.now)()
    }

    /// Mark the start of timer processing
    pub fn start_manager(&self) {
        let now = self.now();
        self.state.lock().time_mark = now;
    }

    /// Time of the last `start_manager` or processing pass
    pub fn time_mark(&self) -> u64 {
        self.state.lock().time_mark
    }

    /// Whether any timer is running
    pub fn are_active_timers(&self) -> bool {
        let state = self.state.lock();
        state.slots.values().any(|slot| slot.deadline.is_some())
    }

    /// Fire every timer whose deadline has passed. Returns how many fired.
    pub fn process_timers(&self) -> usize {
        let now = self.now();
        {
            let mut state = self.state.lock();
            trace!(now, delta = elapsed::delta_milliseconds(state.time_mark, now), "processing timers");
            state.in_tick = true;
        }

        let mut fired = 0;
        loop {
            let (id, callback) = {
                let mut state = self.state.lock();
                let Some(id) = state.pop_due(now) else { break };
                let Some(slot) = state.slots.get_mut(&id) else { continue };
                slot.deadline = None;
                (id, slot.callback.take())
            };

            if let Some(mut callback) = callback {
                callback();
                fired += 1;
                if let Some(slot) = self.state.lock().slots.get_mut(&id) {
                    slot.callback = Some(callback);
                }
            }
        }

        let mut state = self.state.lock();
        let staged = std::mem::take(&mut state.staged);
        state.queue.extend(staged);
        state.in_tick = false;
        state.time_mark = now;
        fired
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Timer slots
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub(super) fn register(&self, callback: TimerCallback) -> TimerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = TimerId::new(state.next_id);
        state.slots.insert(
            id,
            TimerSlot {
                callback: Some(callback),
                generation: 0,
                deadline: None,
            },
        );
        id
    }

    pub(super) fn unregister(&self, id: TimerId) -> Option<TimerCallback> {
        self.state.lock().slots.remove(&id).and_then(|slot| slot.callback)
    }

    pub(super) fn start(&self, id: TimerId, duration_ms: u64) {
        let deadline = self.now().saturating_add(duration_ms);
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let Some(slot) = state.slots.get_mut(&id) else { return };
        slot.generation += 1;
        slot.deadline = Some(deadline);
        let entry = ScheduledTimer {
            deadline,
            seq,
            id,
            generation: slot.generation,
        };
        if state.in_tick {
            state.staged.push(entry);
        } else {
            state.queue.push(entry);
        }
    }

    pub(super) fn stop(&self, id: TimerId) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.generation += 1;
            slot.deadline = None;
        }
    }

    pub(super) fn is_active(&self, id: TimerId) -> bool {
        self.state
            .lock()
            .slots
            .get(&id)
            .is_some_and(|slot| slot.deadline.is_some())
    }

    pub(super) fn deadline(&self, id: TimerId) -> Option<u64> {
        self.state.lock().slots.get(&id).and_then(|slot| slot.deadline)
    }
}
