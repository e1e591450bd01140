//! # Periodic Scheduler
//!
//! Cooperative, monotonic interval dispatcher polled from a thread's forever
//! loop (bare, or inside an [`EventLoop`] via [`PeriodicEventLoop`]).
//!
//! # Overview
//! "Monotonic" means an interval of duration `D` fires on every `D`
//! boundary of system time: the callback receives both the current time and
//! the boundary it is logically executing. The first execution of an
//! interval snaps its marker down to a multiple of `D`, so the first firing
//! comes early.
//!
//! If a callback overruns past the interval's next boundary the scheduler
//! reports slippage (after the callback) and resynchronizes the marker to
//! the most recent boundary, absorbing the missed periods.

use crate::domain::elapsed;
use crate::domain::event_loop::EventLoop;
use crate::domain::thread::{Runnable, Thread};
use crate::infrastructure::fatal;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, warn};

/// Interval callback: `(current_tick, interval_boundary)`
pub type IntervalFn = Box<dyn FnMut(u64, u64) + Send>;

/// Slippage report: `(interval, current_tick, missed_boundary)`
pub type SlippageFn = Box<dyn FnMut(&Interval, u64, u64) + Send>;

/// Loop entry/exit hook receiving the current tick
pub type HookFn = Box<dyn FnMut(u64) + Send>;

/// Millisecond time source
pub type NowFn = Box<dyn Fn() -> u64 + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One periodic activity
pub struct Interval {
    name: String,
    duration_ms: u64,
    time_marker: u64,
    initialized: bool,
    callback: IntervalFn,
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interval")
            .field("name", &self.name)
            .field("duration_ms", &self.duration_ms)
            .field("time_marker", &self.time_marker)
            .finish()
    }
}

impl Interval {
    /// Interval firing every `duration_ms`. A zero duration is fatal.
    #[track_caller]
    pub fn new<F>(name: &str, duration_ms: u64, callback: F) -> Self
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        if duration_ms == 0 {
            fatal::raise(format!("PeriodicScheduler: interval '{name}' has a zero duration"));
        }
        Self {
            name: name.to_owned(),
            duration_ms,
            time_marker: 0,
            initialized: false,
            callback: Box::new(callback),
        }
    }

    /// Name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Period in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Boundary of the last execution
    pub fn time_marker(&self) -> u64 {
        self.time_marker
    }

    fn set_time_marker(&mut self, current: u64) {
        self.time_marker = elapsed::round_down(current, self.duration_ms);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Polled interval dispatcher
pub struct PeriodicScheduler {
    intervals: Vec<Interval>,
    report_slippage: Option<SlippageFn>,
    begin_hook: Option<HookFn>,
    end_hook: Option<HookFn>,
    now: NowFn,
}

impl fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("intervals", &self.intervals)
            .finish_non_exhaustive()
    }
}

impl PeriodicScheduler {
    /// Scheduler over `intervals`, reading [`elapsed::milliseconds`]
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self {
            intervals,
            report_slippage: None,
            begin_hook: None,
            end_hook: None,
            now: Box::new(elapsed::milliseconds),
        }
    }

    /// Report slippage to `handler` (otherwise it is only logged)
    pub fn with_slippage_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Interval, u64, u64) + Send + 'static,
    {
        self.report_slippage = Some(Box::new(handler));
        self
    }

    /// Hooks run by [`PeriodicScheduler::begin_loop`] / [`PeriodicScheduler::end_loop`]
    pub fn with_loop_hooks<B, E>(mut self, begin: B, end: E) -> Self
    where
        B: FnMut(u64) + Send + 'static,
        E: FnMut(u64) + Send + 'static,
    {
        self.begin_hook = Some(Box::new(begin));
        self.end_hook = Some(Box::new(end));
        self
    }

    /// Read time from `now` instead of the elapsed-time source
    pub fn with_time_source<F>(mut self, now: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.now = Box::new(now);
        self
    }

    /// Scheduled intervals
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Call before entering the forever loop
    pub fn begin_loop(&mut self) {
        let now = (self.now)();
        if let Some(hook) = self.begin_hook.as_mut() {
            hook(now);
        }
    }

    /// Call after leaving the forever loop
    pub fn end_loop(&mut self) {
        let now = (self.now)();
        if let Some(hook) = self.end_hook.as_mut() {
            hook(now);
        }
    }

    /// Run every interval whose boundary has passed. Returns whether at
    /// least one interval executed.
    pub fn execute_scheduler(&mut self) -> bool {
        let mut executed = false;
        let now_fn = &self.now;
        let report = &mut self.report_slippage;

        for interval in &mut self.intervals {
            let current = now_fn();
            if !interval.initialized {
                interval.initialized = true;
                interval.set_time_marker(current);
            }

            if !elapsed::expired_milliseconds(interval.time_marker, interval.duration_ms, current) {
                continue;
            }

            interval.time_marker += interval.duration_ms;
            (interval.callback)(current, interval.time_marker);
            executed = true;

            let after = now_fn();
            if elapsed::expired_milliseconds(interval.time_marker, interval.duration_ms, after) {
                let missed = interval.time_marker + interval.duration_ms;
                match report.as_mut() {
                    Some(handler) => handler(&*interval, after, missed),
                    None => warn!(interval = %interval.name, current = after, missed, "interval slipped"),
                }
                interval.set_time_marker(after);
                debug!(interval = %interval.name, marker = interval.time_marker, "interval resynchronized");
            }
        }
        executed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event loop integration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event loop that polls a [`PeriodicScheduler`] after every pass.
///
/// Interval durations should be multiples of the loop timeout.
pub struct PeriodicEventLoop {
    event_loop: EventLoop,
    scheduler: Mutex<PeriodicScheduler>,
}

impl fmt::Debug for PeriodicEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicEventLoop")
            .field("event_loop", &self.event_loop)
            .finish_non_exhaustive()
    }
}

impl PeriodicEventLoop {
    /// Combine a loop and a scheduler
    pub fn new(event_loop: EventLoop, scheduler: PeriodicScheduler) -> Self {
        Self {
            event_loop,
            scheduler: Mutex::new(scheduler),
        }
    }

    /// The underlying loop
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }
}

impl Runnable for PeriodicEventLoop {
    fn app_run(&self) {
        self.scheduler.lock().begin_loop();
        self.event_loop.run_with(|| {
            self.scheduler.lock().execute_scheduler();
            false
        });
        self.scheduler.lock().end_loop();
    }

    fn please_stop(&self) {
        self.event_loop.please_stop();
    }

    fn set_thread_of_execution(&self, thread: &Thread) {
        self.event_loop.set_thread_of_execution(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<(&'static str, u64, u64)>>>;

    fn recorder(log: &Log, tag: &'static str) -> impl FnMut(u64, u64) + Send + 'static {
        let log = Arc::clone(log);
        move |current, boundary| log.lock().push((tag, current, boundary))
    }

    fn fired(log: &Log, tag: &str) -> Vec<(u64, u64)> {
        log.lock()
            .iter()
            .filter(|(t, _, _)| *t == tag)
            .map(|(_, c, b)| (*c, *b))
            .collect()
    }

    fn scheduler(clock: &Arc<AtomicU64>, log: &Log) -> PeriodicScheduler {
        let source = Arc::clone(clock);
        PeriodicScheduler::new(vec![
            Interval::new("apple", 10, recorder(log, "apple")),
            Interval::new("orange", 20, recorder(log, "orange")),
            Interval::new("cherry", 7, recorder(log, "cherry")),
        ])
        .with_time_source(move || source.load(Ordering::SeqCst))
    }

    #[test]
    fn test_fires_on_boundaries() {
        let clock = Arc::new(AtomicU64::new(5));
        let log: Log = Arc::default();
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let (begin, end) = (Arc::clone(&hooks), Arc::clone(&hooks));
        let mut uut = scheduler(&clock, &log).with_loop_hooks(
            move |t| begin.lock().push(("begin", t)),
            move |t| end.lock().push(("end", t)),
        );

        uut.begin_loop();
        assert!(!uut.execute_scheduler());

        for tick in [10, 15, 20, 21] {
            clock.store(tick, Ordering::SeqCst);
            assert!(uut.execute_scheduler());
        }
        uut.end_loop();

        assert_eq!(fired(&log, "apple"), vec![(10, 10), (20, 20)]);
        assert_eq!(fired(&log, "orange"), vec![(20, 20)]);
        assert_eq!(fired(&log, "cherry"), vec![(10, 7), (15, 14), (21, 21)]);
        assert_eq!(*hooks.lock(), vec![("begin", 5), ("end", 21)]);
    }

    #[test]
    fn test_slippage_reported_and_resynchronized() {
        let clock = Arc::new(AtomicU64::new(5));
        let log: Log = Arc::default();
        let slips = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slips);
        let mut uut = scheduler(&clock, &log).with_slippage_handler(move |interval, current, missed| {
            sink.lock().push((interval.name().to_owned(), current, missed));
        });

        assert!(!uut.execute_scheduler());
        clock.store(10, Ordering::SeqCst);
        assert!(uut.execute_scheduler());
        assert!(slips.lock().is_empty());

        clock.store(30, Ordering::SeqCst);
        assert!(uut.execute_scheduler());
        assert_eq!(
            *slips.lock(),
            vec![("apple".to_owned(), 30, 30), ("cherry".to_owned(), 30, 21)]
        );

        clock.store(40, Ordering::SeqCst);
        assert!(uut.execute_scheduler());
        assert_eq!(fired(&log, "apple").last(), Some(&(40, 40)));
        assert_eq!(fired(&log, "orange"), vec![(30, 20), (40, 40)]);
        assert_eq!(fired(&log, "cherry").last(), Some(&(40, 35)));
        assert_eq!(slips.lock().len(), 2);
    }

    #[test]
    #[should_panic(expected = "zero duration")]
    fn test_zero_duration_is_fatal() {
        fatal::set_policy(fatal::FatalPolicy::Panic);
        let _ = Interval::new("broken", 0, |_, _| {});
    }
}
