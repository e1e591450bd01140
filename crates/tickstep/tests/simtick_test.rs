//! Virtual Time Integration Tests
//!
//! Participating threads advance in lock-step with a driver calling
//! `Runtime::advance`. Every scenario waits until the expected number of
//! threads is queued on the next tick before driving, so the observed tick
//! values are exact.

use parking_lot::Mutex as PlMutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tickstep::{
    api, elapsed, EventLoop, FatalPolicy, Interval, PeriodicEventLoop, PeriodicScheduler, Runtime,
    Semaphore, Thread, ThreadOptions,
};

fn sim_runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Runtime::builder()
        .sim_ticks(true)
        .min_ticks_for_advance(10)
        .no_activity_limit(Duration::from_secs(1))
        .fatal_policy(FatalPolicy::Panic)
        .build()
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn wait_for_waiters(runtime: &Runtime, count: usize) {
    wait_for(|| runtime.sim().waiter_count() == count);
}

/// Advance in 10-tick steps until every thread has finished its body
fn drive_until_done(runtime: &Runtime, threads: &[Thread]) {
    for _ in 0..1_000 {
        if threads.iter().all(|t| !t.is_running()) {
            return;
        }
        assert!(runtime.advance(10), "advance stalled at {}", runtime.current_tick());
    }
    panic!("threads did not finish");
}

fn join_all(runtime: &Runtime, threads: &[Thread]) {
    for thread in threads {
        wait_for(|| !thread.is_running());
        runtime.destroy_thread(thread).expect("destroy");
    }
}

#[test]
fn test_participants_observe_identical_ticks() {
    let runtime = sim_runtime();
    let logs: Vec<Arc<PlMutex<Vec<u64>>>> = (0..2).map(|_| Arc::default()).collect();

    let threads: Vec<Thread> = logs
        .iter()
        .enumerate()
        .map(|(n, log)| {
            let log = Arc::clone(log);
            runtime
                .spawn(&format!("stepper-{n}"), ThreadOptions::default(), move || {
                    assert!(api::using_sim_ticks());
                    for _ in 0..5 {
                        log.lock().push(elapsed::milliseconds());
                        api::sleep(10);
                    }
                })
        })
        .collect();
    assert!(threads.iter().all(Thread::uses_sim_ticks));

    wait_for_waiters(&runtime, 2);
    drive_until_done(&runtime, &threads);

    let expected = vec![0, 10, 20, 30, 40];
    assert_eq!(*logs[0].lock(), expected);
    assert_eq!(*logs[1].lock(), expected);
    assert_eq!(runtime.current_tick(), 50);
    join_all(&runtime, &threads);
    assert_eq!(runtime.sim().participants(), 0);
}

#[test]
fn test_timed_wait_counts_virtual_ticks() {
    let runtime = sim_runtime();
    let (tx, rx) = mpsc::channel();
    let cherry = runtime
        .spawn("cherry", ThreadOptions::default(), move || {
            let start = elapsed::milliseconds();
            let signalled = Thread::timed_wait(333);
            let end = elapsed::milliseconds();
            let _ = tx.send((signalled, start, end, Thread::try_wait()));
        });

    wait_for_waiters(&runtime, 1);
    drive_until_done(&runtime, std::slice::from_ref(&cherry));

    let (signalled, start, end, leftover) = rx.recv().expect("report");
    assert!(!signalled);
    assert_eq!(start, 0);
    assert_eq!(end, 340);
    assert!(!leftover);
    join_all(&runtime, &[cherry]);
}

#[test]
fn test_shared_semaphore_times_out_then_drains_in_virtual_time() {
    let runtime = sim_runtime();
    let sema = Arc::new(Semaphore::new(0));
    let (tx, rx) = mpsc::channel();
    let cherry = {
        let sema = Arc::clone(&sema);
        runtime.spawn("cherry", ThreadOptions::default(), move || {
            let start = elapsed::milliseconds();
            let timed_out = !sema.timed_wait(333);
            let after_timeout = elapsed::milliseconds();

            sema.signal();
            sema.su_signal();
            sema.signal();
            let signalled = sema.timed_wait(1_000);
            let waited = elapsed::delta_since(after_timeout);
            let drained = [sema.try_wait(), sema.try_wait(), sema.try_wait()];
            let _ = tx.send((timed_out, start, after_timeout, signalled, waited, drained));
        })
    };

    wait_for_waiters(&runtime, 1);
    drive_until_done(&runtime, std::slice::from_ref(&cherry));

    let (timed_out, start, after_timeout, signalled, waited, drained) = rx.recv().expect("report");
    assert!(timed_out);
    assert_eq!((start, after_timeout), (0, 340));
    assert!(signalled);
    assert_eq!(waited, 0);
    assert_eq!(drained, [true, true, false]);
    assert_eq!(sema.count(), 0);
    join_all(&runtime, &[cherry]);
}

#[test]
fn test_side_effects_never_run_ahead_of_the_tick() {
    const STEPPERS: usize = 4;
    const STEPS: u64 = 50;

    let runtime = Runtime::builder()
        .sim_ticks(true)
        .min_ticks_for_advance(1)
        .no_activity_limit(Duration::from_secs(1))
        .fatal_policy(FatalPolicy::Panic)
        .build();
    let log: Arc<PlMutex<Vec<(u64, usize)>>> = Arc::default();

    let threads: Vec<Thread> = (0..STEPPERS)
        .map(|n| {
            let log = Arc::clone(&log);
            runtime.spawn(&format!("jitter-{n}"), ThreadOptions::default(), move || {
                for step in 0..STEPS {
                    // Uneven real work per tick so threads finish in varying order
                    let jitter = ((n as u64 * 7 + step * 13) % 5) * 100;
                    std::thread::sleep(Duration::from_micros(jitter));
                    log.lock().push((elapsed::milliseconds(), n));
                    api::sleep(1);
                }
            })
        })
        .collect();

    wait_for_waiters(&runtime, STEPPERS);
    let mut advanced = 0;
    while threads.iter().any(Thread::is_running) {
        assert!(advanced < STEPS + 1, "steppers did not finish");
        assert!(runtime.advance(1), "advance stalled at {}", runtime.current_tick());
        advanced += 1;
    }
    join_all(&runtime, &threads);

    let log = log.lock();
    assert_eq!(log.len(), STEPPERS * STEPS as usize);
    assert!(
        log.windows(2).all(|pair| pair[0].0 <= pair[1].0),
        "an entry for a later tick was logged before an earlier tick settled"
    );
    for tick in 0..STEPS {
        assert_eq!(log.iter().filter(|(at, _)| *at == tick).count(), STEPPERS);
    }
    assert_eq!(runtime.current_tick(), STEPS);
}

#[test]
fn test_round_robin_with_ticking_thread() {
    let runtime = Runtime::builder()
        .sim_ticks(true)
        .min_ticks_for_advance(1)
        .no_activity_limit(Duration::from_secs(1))
        .fatal_policy(FatalPolicy::Panic)
        .build();
    let stop = Arc::new(AtomicBool::new(false));
    let ticker = {
        let stop = Arc::clone(&stop);
        runtime
            .spawn("ticker", ThreadOptions::default(), move || {
                while !stop.load(Ordering::SeqCst) {
                    api::sleep(1);
                }
            })
    };

    let ring: Arc<PlMutex<Vec<Thread>>> = Arc::default();
    let counts: Arc<Vec<AtomicUsize>> = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect());
    let fruits: Vec<Thread> = ["apple", "pear", "orange"]
        .iter()
        .enumerate()
        .map(|(slot, name)| {
            let ring = Arc::clone(&ring);
            let counts = Arc::clone(&counts);
            runtime
                .spawn(name, ThreadOptions::default(), move || {
                    for _ in 0..3 {
                        Thread::wait();
                        counts[slot].fetch_add(1, Ordering::SeqCst);
                        let next = ring.lock()[(slot + 1) % 3].clone();
                        next.signal();
                    }
                })
        })
        .collect();
    *ring.lock() = fruits.clone();

    wait_for_waiters(&runtime, 1);
    fruits[0].signal();
    let mut ticks = 0;
    while fruits.iter().any(Thread::is_running) {
        assert!(ticks < 10_000, "fruits did not finish");
        assert!(runtime.advance(1));
        ticks += 1;
    }

    stop.store(true, Ordering::SeqCst);
    assert!(runtime.advance(1));
    join_all(&runtime, &fruits);
    join_all(&runtime, &[ticker]);

    let totals: Vec<usize> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(totals, vec![3, 3, 3]);
    assert_eq!(runtime.current_tick(), ticks + 1);
    assert!(runtime.registry().is_empty());
}

#[test]
fn test_real_time_thread_ignores_virtual_time() {
    let runtime = sim_runtime();
    let (tx, rx) = mpsc::channel();
    let thread = runtime
        .spawn("wall-clock", ThreadOptions::default().real_time(), move || {
            let start = Instant::now();
            api::sleep(20);
            let _ = tx.send((api::using_sim_ticks(), start.elapsed()));
        });

    let (sim, slept) = rx.recv().expect("report");
    assert!(!sim);
    assert!(slept >= Duration::from_millis(20));
    assert!(!thread.uses_sim_ticks());
    assert_eq!(runtime.current_tick(), 0);
    join_all(&runtime, &[thread]);
}

#[test]
fn test_advance_from_participant_is_fatal() {
    let runtime = sim_runtime();
    let (tx, rx) = mpsc::channel();
    let driver = runtime.clone();
    let thread = runtime
        .spawn("rogue", ThreadOptions::default(), move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| driver.advance(10)));
            let _ = tx.send(outcome.is_err());
        });

    assert!(rx.recv().expect("report"));
    join_all(&runtime, &[thread]);
}

#[test]
fn test_periodic_loop_fires_on_virtual_boundaries() {
    let runtime = sim_runtime();
    let fired: Arc<PlMutex<Vec<(u64, u64)>>> = Arc::default();
    let hooks: Arc<PlMutex<Vec<(&'static str, u64)>>> = Arc::default();

    let scheduler = {
        let fired = Arc::clone(&fired);
        let (begin, end) = (Arc::clone(&hooks), Arc::clone(&hooks));
        PeriodicScheduler::new(vec![Interval::new("apple", 20, move |current, boundary| {
            fired.lock().push((current, boundary));
        })])
        .with_loop_hooks(
            move |now| begin.lock().push(("begin", now)),
            move |now| end.lock().push(("end", now)),
        )
    };
    let periodic = Arc::new(PeriodicEventLoop::new(EventLoop::new(10), scheduler));
    let thread = runtime
        .create_thread(periodic.clone(), "periodic", ThreadOptions::default());

    wait_for_waiters(&runtime, 1);
    for _ in 0..10 {
        assert!(runtime.advance(10));
    }
    assert_eq!(runtime.current_tick(), 100);
    assert_eq!(
        *fired.lock(),
        vec![(20, 20), (40, 40), (60, 60), (80, 80), (100, 100)]
    );

    periodic.event_loop().please_stop();
    assert!(runtime.advance(10));
    join_all(&runtime, &[thread]);
    assert_eq!(*hooks.lock(), vec![("begin", 0), ("end", 110)]);
}

#[test]
fn test_advance_stalls_when_nobody_waits() {
    let runtime = Runtime::builder()
        .sim_ticks(true)
        .no_activity_limit(Duration::from_millis(50))
        .fatal_policy(FatalPolicy::Panic)
        .build();
    assert!(!runtime.advance(25));
    assert_eq!(runtime.current_tick(), 0);
    assert_eq!(runtime.sim().remaining_ticks(), 25);
}
