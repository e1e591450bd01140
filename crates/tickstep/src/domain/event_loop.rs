//! # Event Loop
//!
//! Cooperative per-thread dispatcher combining a timed semaphore wait, 32
//! event-flag bits and the thread's software timers.
//!
//! # Overview
//! ```text
//! Idle ──start_event_loop──▶ Started ──▶ WaitForEvent ⇄ Dispatch ──please_stop──▶ Stopped
//! ```
//! [`EventLoop::wait_and_process_events`] is the single step function. One
//! pass:
//!
//! 1. returns `false` if a stop was requested,
//! 2. waits on the loop semaphore for up to `timeout_ms` (skipped when the
//!    previous pass overran the timeout, so timers are not starved),
//! 3. checks the stop flag again,
//! 4. atomically takes and clears the pending event flags and dispatches
//!    each set bit in ascending order,
//! 5. fires expired timers.
//!
//! Under virtual time the wait in step 2 is the thread's tick barrier.
//!
//! # Design
//! Flags and the stop request are atomics, so the privileged producers
//! (`su_notify*`) never take a lock. Loops that extend the basic pass
//! (mailbox, periodic scheduling) call [`EventLoop::run_with`] with their
//! own per-pass work.

use crate::domain::elapsed;
use crate::domain::sync::Semaphore;
use crate::domain::thread::{Runnable, Thread};
use crate::domain::timer::TimerManager;
use crate::infrastructure::fatal;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Number of event flags per loop
pub const EVENT_FLAG_COUNT: u8 = 32;

/// Receiver of event-flag notifications
pub trait EventFlagHandler: Send + Sync {
    /// Called once per pass for each set flag, in ascending order
    fn process_event_flag(&self, event_number: u8);
}

impl<F> EventFlagHandler for F
where
    F: Fn(u8) + Send + Sync,
{
    fn process_event_flag(&self, event_number: u8) {
        self(event_number)
    }
}

/// Cooperative event and timer dispatcher
pub struct EventLoop {
    sema: Semaphore,
    timeout_ms: u64,
    events: AtomicU32,
    run: AtomicBool,
    time_start_of_loop: AtomicU64,
    timers: Arc<TimerManager>,
    handler: Option<Arc<dyn EventFlagHandler>>,
    thread: Mutex<Option<Thread>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("timeout_ms", &self.timeout_ms)
            .field("events", &format_args!("{:#010x}", self.events.load(Ordering::Acquire)))
            .field("run", &self.run.load(Ordering::Acquire))
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl EventLoop {
    /// Loop whose semaphore wait times out after `timeout_ms`.
    /// A zero timeout is a fatal usage error.
    #[track_caller]
    pub fn new(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            fatal::raise("EventLoop: timeout period can not be zero");
        }
        Self {
            sema: Semaphore::new(0),
            timeout_ms,
            events: AtomicU32::new(0),
            run: AtomicBool::new(true),
            time_start_of_loop: AtomicU64::new(0),
            timers: Arc::new(TimerManager::new()),
            handler: None,
            thread: Mutex::new(None),
        }
    }

    /// Loop using the runtime's default timeout
    pub fn with_default_timeout(runtime: &Runtime) -> Self {
        Self::new(runtime.config().default_event_loop_timeout_ms)
    }

    /// Dispatch event flags to `handler`
    pub fn with_event_handler(mut self, handler: Arc<dyn EventFlagHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Drive an explicit timer manager
    pub fn with_timer_manager(mut self, timers: Arc<TimerManager>) -> Self {
        self.timers = timers;
        self
    }

    /// Semaphore wait timeout
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Timer manager driven by this loop
    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    /// Thread executing this loop, once started
    pub fn thread(&self) -> Option<Thread> {
        self.thread.lock().clone()
    }

    /// Whether the calling thread is the one executing this loop
    pub fn is_loop_thread(&self) -> bool {
        match (Thread::try_current(), self.thread.lock().as_ref()) {
            (Some(me), Some(owner)) => me == *owner,
            _ => false,
        }
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        !self.run.load(Ordering::Acquire)
    }

    /// Pending (not yet dispatched) event flags
    pub fn pending_events(&self) -> u32 {
        self.events.load(Ordering::Acquire)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Producers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Wake the loop without setting a flag
    pub fn signal(&self) {
        self.sema.signal();
    }

    /// Privileged wake-up
    pub fn su_signal(&self) {
        self.sema.su_signal();
    }

    /// Set event flag `event_number` and wake the loop
    #[track_caller]
    pub fn notify(&self, event_number: u8) {
        self.notify_events(Self::mask_for(event_number));
    }

    /// Set every flag in `mask` and wake the loop
    pub fn notify_events(&self, mask: u32) {
        self.events.fetch_or(mask, Ordering::AcqRel);
        self.sema.signal();
    }

    /// Privileged [`EventLoop::notify`]
    #[track_caller]
    pub fn su_notify(&self, event_number: u8) {
        self.su_notify_events(Self::mask_for(event_number));
    }

    /// Privileged [`EventLoop::notify_events`]; never locks
    pub fn su_notify_events(&self, mask: u32) {
        self.events.fetch_or(mask, Ordering::AcqRel);
        self.sema.su_signal();
    }

    #[track_caller]
    fn mask_for(event_number: u8) -> u32 {
        if event_number >= EVENT_FLAG_COUNT {
            fatal::raise(format!(
                "EventLoop: event number {event_number} out of range (0..{EVENT_FLAG_COUNT})"
            ));
        }
        1u32 << event_number
    }

    /// Request the loop to exit and wake it if idle
    pub fn please_stop(&self) {
        self.run.store(false, Ordering::Release);
        self.sema.signal();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Loop thread
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Prepare the loop on its own thread
    pub fn start_event_loop(&self) {
        self.time_start_of_loop.store(elapsed::milliseconds(), Ordering::Release);
        self.timers.start_manager();
        debug!(timeout_ms = self.timeout_ms, "event loop started");
    }

    /// Loop teardown hook
    pub fn stop_event_loop(&self) {
        debug!("event loop stopped");
    }

    /// One pass of the loop. Returns `false` once a stop was requested.
    pub fn wait_and_process_events(&self, skip_wait: bool) -> bool {
        if self.is_stopping() {
            return false;
        }

        let now = elapsed::milliseconds();
        let last = self.time_start_of_loop.swap(now, Ordering::AcqRel);
        let overran = elapsed::delta_milliseconds(last, now) > self.timeout_ms;

        if !(skip_wait || overran) {
            self.sema.timed_wait(self.timeout_ms);
        }

        if self.is_stopping() {
            return false;
        }

        let events = self.events.swap(0, Ordering::AcqRel);
        if events != 0 {
            for event_number in 0..EVENT_FLAG_COUNT {
                if events & (1u32 << event_number) != 0 {
                    self.process_event_flag(event_number);
                }
            }
        }

        self.timers.process_timers();
        true
    }

    /// Dispatch one flag to the installed handler
    pub fn process_event_flag(&self, event_number: u8) {
        if let Some(handler) = &self.handler {
            handler.process_event_flag(event_number);
        }
    }

    /// Run passes until stopped. `after_pass` runs after every completed
    /// pass and returns whether the next pass should skip its wait.
    pub fn run_with<F>(&self, mut after_pass: F)
    where
        F: FnMut() -> bool,
    {
        self.start_event_loop();
        let mut skip_wait = false;
        while self.wait_and_process_events(skip_wait) {
            skip_wait = after_pass();
        }
        self.stop_event_loop();
    }
}

impl Runnable for EventLoop {
    fn app_run(&self) {
        self.run_with(|| false);
    }

    fn please_stop(&self) {
        EventLoop::please_stop(self);
    }

    fn set_thread_of_execution(&self, thread: &Thread) {
        *self.thread.lock() = Some(thread.clone());
    }
}
