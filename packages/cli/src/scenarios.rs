//! Scenario drivers
//!
//! Each scenario spawns its threads on the runtime, then drives them from
//! the calling (non-participating) thread: in virtual time by advancing the
//! tick counter, in real time by polling until they finish.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tickstep::{
    api, elapsed, EventLoop, Interval, MailboxServer, Message, PeriodicEventLoop,
    PeriodicScheduler, Runtime, Thread, ThreadOptions,
};
use tracing::{debug, info, warn};

const SCENARIO_DEADLINE: Duration = Duration::from_secs(30);

/// Outcome of one scenario
#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: &'static str,
    pub sim_ticks: bool,
    pub final_ms: u64,
    pub metrics: BTreeMap<String, u64>,
    #[serde(skip)]
    pub lines: Vec<String>,
}

impl Report {
    fn new(scenario: &'static str, runtime: &Runtime) -> Self {
        Self {
            scenario,
            sim_ticks: runtime.config().sim_ticks,
            final_ms: 0,
            metrics: BTreeMap::new(),
            lines: Vec::new(),
        }
    }

    fn metric(&mut self, key: impl Into<String>, value: u64) {
        let key = key.into();
        self.lines.push(format!("{key}: {value}"));
        self.metrics.insert(key, value);
    }

    fn finish(mut self, runtime: &Runtime) -> Self {
        self.final_ms = if self.sim_ticks {
            runtime.current_tick()
        } else {
            elapsed::milliseconds_in_real_time()
        };
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driving
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run time forward until `done` holds
fn drive(runtime: &Runtime, mut done: impl FnMut() -> bool) -> Result<()> {
    let step = runtime.config().min_ticks_for_advance.max(1);
    let deadline = Instant::now() + SCENARIO_DEADLINE;
    while !done() {
        if runtime.config().sim_ticks {
            if !runtime.advance(step) && !done() {
                bail!("virtual time stalled at tick {}", runtime.current_tick());
            }
        } else {
            api::sleep_in_real_time(1);
        }
        if Instant::now() >= deadline {
            bail!("scenario did not finish within {SCENARIO_DEADLINE:?}");
        }
    }
    Ok(())
}

fn finish_thread(runtime: &Runtime, thread: &Thread) -> Result<()> {
    drive(runtime, || !thread.is_running())?;
    runtime
        .destroy_thread(thread)
        .with_context(|| format!("destroying {}", thread.name()))
}

/// Participant that keeps virtual time moving while others block on
/// semaphores. `None` in real time.
fn spawn_ticker(runtime: &Runtime, stop: &Arc<AtomicBool>) -> Result<Option<Thread>> {
    if !runtime.config().sim_ticks {
        return Ok(None);
    }
    let stop = Arc::clone(stop);
    let step = runtime.config().min_ticks_for_advance;
    let thread = runtime.try_spawn("ticker", ThreadOptions::default(), move || {
        while !stop.load(Ordering::Acquire) {
            api::sleep(step);
        }
    })?;
    Ok(Some(thread))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn round_robin(runtime: &Runtime, rounds: usize) -> Result<Report> {
    const FRUITS: [&str; 3] = ["apple", "pear", "orange"];

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = spawn_ticker(runtime, &stop)?;

    let ring: Arc<Mutex<Vec<Thread>>> = Arc::default();
    let counts: Arc<Vec<AtomicUsize>> = Arc::new(FRUITS.iter().map(|_| AtomicUsize::new(0)).collect());
    let mut fruits = Vec::with_capacity(FRUITS.len());
    for (slot, name) in FRUITS.iter().enumerate() {
        let ring = Arc::clone(&ring);
        let counts = Arc::clone(&counts);
        let thread = runtime.try_spawn(name, ThreadOptions::default(), move || {
            for _ in 0..rounds {
                Thread::wait();
                counts[slot].fetch_add(1, Ordering::AcqRel);
                debug!(fruit = %Thread::my_name(), "token received");
                let next = ring.lock()[(slot + 1) % FRUITS.len()].clone();
                next.signal();
            }
        })?;
        fruits.push(thread);
    }
    *ring.lock() = fruits.clone();

    info!(rounds, "starting round robin");
    fruits[0].signal();
    drive(runtime, || fruits.iter().all(|t| !t.is_running()))?;
    for fruit in &fruits {
        finish_thread(runtime, fruit)?;
    }

    stop.store(true, Ordering::Release);
    if let Some(ticker) = &ticker {
        finish_thread(runtime, ticker)?;
    }

    let mut report = Report::new("round-robin", runtime);
    for (name, count) in FRUITS.iter().zip(counts.iter()) {
        report.metric(format!("{name}_rounds"), count.load(Ordering::Acquire) as u64);
    }
    Ok(report.finish(runtime))
}

pub fn timed_wait(runtime: &Runtime, timeout_ms: u64) -> Result<Report> {
    let (tx, rx) = mpsc::channel();
    let cherry = runtime.try_spawn("cherry", ThreadOptions::default(), move || {
        let start = elapsed::milliseconds();
        let signalled = Thread::timed_wait(timeout_ms);
        let waited = elapsed::delta_since(start);
        let _ = tx.send((signalled, waited, Thread::try_wait()));
    })?;

    finish_thread(runtime, &cherry)?;
    let (signalled, waited, leftover) = rx.recv().context("cherry exited without reporting")?;
    if signalled || leftover {
        warn!("cherry's semaphore was signalled unexpectedly");
    }

    let mut report = Report::new("timed-wait", runtime);
    report.metric("timeout_ms", timeout_ms);
    report.metric("waited_ms", waited);
    report.metric("signalled", u64::from(signalled));
    Ok(report.finish(runtime))
}

pub fn slippage(runtime: &Runtime, period_ms: u64, boundaries: usize) -> Result<Report> {
    if period_ms == 0 {
        bail!("period must be at least 1 ms");
    }

    let fired = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let slips: Arc<Mutex<Vec<(u64, u64)>>> = Arc::default();

    let scheduler = {
        let (fired, done) = (Arc::clone(&fired), Arc::clone(&done));
        let slips = Arc::clone(&slips);
        PeriodicScheduler::new(vec![Interval::new("worker", period_ms, move |current, boundary| {
            let count = fired.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(current, boundary, count, "interval fired");
            if count == 2 {
                // Overrun past the next boundary once
                api::sleep(period_ms * 2);
            }
            if count >= boundaries {
                done.store(true, Ordering::Release);
            }
        })])
        .with_slippage_handler(move |interval, current, missed| {
            warn!(interval = interval.name(), current, missed, "slippage");
            slips.lock().push((current, missed));
        })
    };

    let event_loop = EventLoop::new(period_ms.min(runtime.config().min_ticks_for_advance).max(1));
    let periodic = Arc::new(PeriodicEventLoop::new(event_loop, scheduler));
    let thread = runtime.try_create_thread(periodic.clone(), "periodic", ThreadOptions::default())?;

    drive(runtime, || done.load(Ordering::Acquire))?;
    periodic.event_loop().please_stop();
    finish_thread(runtime, &thread)?;

    let mut report = Report::new("slippage", runtime);
    report.metric("period_ms", period_ms);
    report.metric("fired", fired.load(Ordering::Acquire) as u64);
    let slips = slips.lock();
    report.metric("slips", slips.len() as u64);
    for (n, (current, missed)) in slips.iter().enumerate() {
        report.metric(format!("slip_{n}_at"), *current);
        report.metric(format!("slip_{n}_missed"), *missed);
    }
    drop(slips);
    Ok(report.finish(runtime))
}

struct Echo {
    payload: u32,
    reply: Option<(u32, String)>,
}

impl Message for Echo {
    fn process(&mut self) {
        self.reply = Some((self.payload * 2, Thread::my_name()));
    }
}

pub fn echo(runtime: &Runtime, messages: u32) -> Result<Report> {
    let server = Arc::new(MailboxServer::new(runtime.config().default_event_loop_timeout_ms));
    let server_thread = runtime.try_create_thread(server.clone(), "echo-server", ThreadOptions::default())?;

    let (tx, rx) = mpsc::channel();
    let client = {
        let server = Arc::clone(&server);
        runtime.try_spawn("echo-client", ThreadOptions::default(), move || {
            for payload in 0..messages {
                let outcome = server
                    .post_sync(Echo {
                        payload,
                        reply: None,
                    })
                    .map(|echo| echo.reply);
                if tx.send(outcome).is_err() {
                    break;
                }
            }
        })?
    };

    finish_thread(runtime, &client)?;
    server.event_loop().please_stop();
    finish_thread(runtime, &server_thread)?;

    let mut report = Report::new("echo", runtime);
    let mut replies = 0;
    for outcome in rx.try_iter() {
        match outcome? {
            Some((doubled, handler)) => {
                replies += 1;
                report.lines.push(format!("{} -> {doubled} on {handler}", doubled / 2));
            }
            None => bail!("message returned without a reply"),
        }
    }
    report.metric("sent", u64::from(messages));
    report.metric("replies", replies);
    Ok(report.finish(runtime))
}
