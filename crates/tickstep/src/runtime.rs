//! # Runtime Context
//!
//! [`Runtime`] is the explicit context every component hangs off: thread
//! registry, TLS slot allocator, virtual-time engine and configuration.
//!
//! # Lifecycle
//! 1. Build the runtime first ([`Runtime::builder`]). Building installs the
//!    process-wide fatal policy and captures the real-time clock origin.
//! 2. Create threads from it. Each thread registers itself on entry and
//!    deregisters on exit.
//! 3. Dropping the last runtime handle does not stop threads; each live
//!    thread holds its own handle until its body returns.
//! 4. [`Runtime::shutdown`] notifies the registered shutdown handlers and
//!    exits the process.
//!
//! # Failures
//! Thread creation and TLS allocation escalate to the fatal handler by
//! default. The `try_*` variants return [`SystemResult`] for callers with a
//! recovery path.

use crate::domain::simtick::{SimTickConfig, SimTickEngine};
use crate::domain::thread::{
    RunOnce, Runnable, Thread, ThreadOptions, ThreadRegistry, TlsAllocator, TlsKey,
};
use crate::error::SystemResult;
use crate::infrastructure::{clock, fatal, shutdown, FatalPolicy, ShutdownHandler};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Run opted-in threads on virtual time
    pub sim_ticks: bool,
    /// Virtual-time batch size
    pub min_ticks_for_advance: u64,
    /// Bounded real-time window `advance` waits for progress
    pub no_activity_limit: Duration,
    /// Real sleep between polls for queued participants
    pub yield_sleep: Duration,
    /// Yield given to a stopping thread before it is detached
    pub destroy_grace: Duration,
    /// Number of TLS keys the runtime hands out
    pub max_tls_slots: usize,
    /// What a fatal usage error does after logging
    pub fatal_policy: FatalPolicy,
    /// Event loop semaphore timeout used by `EventLoop::with_default_timeout`
    pub default_event_loop_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sim_ticks: false,
            min_ticks_for_advance: 10,
            no_activity_limit: Duration::from_secs(2),
            yield_sleep: Duration::from_millis(1),
            destroy_grace: Duration::from_millis(100),
            max_tls_slots: 8,
            fatal_policy: FatalPolicy::default(),
            default_event_loop_timeout_ms: 1,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `TICKSTEP_SIM_TICKS`, `TICKSTEP_MIN_TICKS`
    /// and `TICKSTEP_NO_ACTIVITY_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(flag) = env_var("TICKSTEP_SIM_TICKS") {
            config.sim_ticks = matches!(flag.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(ticks) = env_var("TICKSTEP_MIN_TICKS").and_then(|v| v.parse().ok()) {
            config.min_ticks_for_advance = ticks;
        }
        if let Some(ms) = env_var("TICKSTEP_NO_ACTIVITY_MS").and_then(|v| v.parse().ok()) {
            config.no_activity_limit = Duration::from_millis(ms);
        }
        config
    }

    fn sim_tick_config(&self) -> SimTickConfig {
        SimTickConfig {
            min_ticks_for_advance: self.min_ticks_for_advance,
            no_activity_limit: self.no_activity_limit,
            yield_sleep: self.yield_sleep,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_ascii_lowercase())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builder for [`Runtime`]
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Enable or disable virtual time
    pub fn sim_ticks(mut self, enabled: bool) -> Self {
        self.config.sim_ticks = enabled;
        self
    }

    /// Virtual-time batch size (0 is treated as 1)
    pub fn min_ticks_for_advance(mut self, ticks: u64) -> Self {
        self.config.min_ticks_for_advance = ticks;
        self
    }

    /// Progress window for `advance`
    pub fn no_activity_limit(mut self, limit: Duration) -> Self {
        self.config.no_activity_limit = limit;
        self
    }

    /// Poll sleep used by `advance`
    pub fn yield_sleep(mut self, sleep: Duration) -> Self {
        self.config.yield_sleep = sleep;
        self
    }

    /// Grace period before a stopping thread is detached
    pub fn destroy_grace(mut self, grace: Duration) -> Self {
        self.config.destroy_grace = grace;
        self
    }

    /// TLS key limit
    pub fn max_tls_slots(mut self, slots: usize) -> Self {
        self.config.max_tls_slots = slots;
        self
    }

    /// Fatal error policy
    pub fn fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.config.fatal_policy = policy;
        self
    }

    /// Default event loop timeout in milliseconds
    pub fn default_event_loop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.default_event_loop_timeout_ms = ms;
        self
    }

    /// Build the runtime
    pub fn build(self) -> Runtime {
        Runtime::new(self.config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct RuntimeInner {
    config: RuntimeConfig,
    registry: ThreadRegistry,
    sim: Arc<SimTickEngine>,
    tls: TlsAllocator,
}

/// Shared runtime context; clones are cheap handles to the same state
#[derive(Debug, Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Builder with default configuration
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Build a runtime from `config`
    pub fn new(config: RuntimeConfig) -> Self {
        clock::init();
        fatal::set_policy(config.fatal_policy);
        info!(
            sim_ticks = config.sim_ticks,
            min_ticks = config.min_ticks_for_advance,
            "runtime initialized"
        );
        Self {
            inner: Arc::new(RuntimeInner {
                sim: Arc::new(SimTickEngine::new(config.sim_tick_config())),
                tls: TlsAllocator::new(config.max_tls_slots),
                registry: ThreadRegistry::new(),
                config,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Live-thread registry
    pub fn registry(&self) -> &ThreadRegistry {
        &self.inner.registry
    }

    /// Virtual-time engine
    pub fn sim(&self) -> &Arc<SimTickEngine> {
        &self.inner.sim
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Threads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a thread running `runnable`. The returned thread is already
    /// registered. A host refusal is fatal under the runtime's policy; use
    /// [`Runtime::try_create_thread`] to handle it instead.
    #[track_caller]
    pub fn create_thread(&self, runnable: Arc<dyn Runnable>, name: &str, options: ThreadOptions) -> Thread {
        match self.try_create_thread(runnable, name, options) {
            Ok(thread) => thread,
            Err(err) => self.fatal(err),
        }
    }

    /// Create a thread, returning the host's refusal as an error
    pub fn try_create_thread(
        &self,
        runnable: Arc<dyn Runnable>,
        name: &str,
        options: ThreadOptions,
    ) -> SystemResult<Thread> {
        Thread::spawn(self, runnable, name, options)
    }

    /// Create a thread running a one-shot closure (fatal on failure)
    #[track_caller]
    pub fn spawn<F>(&self, name: &str, options: ThreadOptions, body: F) -> Thread
    where
        F: FnOnce() + Send + 'static,
    {
        match self.try_spawn(name, options, body) {
            Ok(thread) => thread,
            Err(err) => self.fatal(err),
        }
    }

    /// Create a thread running a one-shot closure, returning failures
    pub fn try_spawn<F>(&self, name: &str, options: ThreadOptions, body: F) -> SystemResult<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_create_thread(Arc::new(RunOnce::new(body)), name, options)
    }

    /// Destroy a thread. Should only be called once its body has returned;
    /// otherwise the thread is asked to stop, given `destroy_grace`, and
    /// detached as a last resort.
    pub fn destroy_thread(&self, thread: &Thread) -> SystemResult<()> {
        thread.destroy(self)
    }

    /// Walk live threads under the registry lock; `false` if aborted early
    pub fn traverse<F>(&self, visitor: F) -> bool
    where
        F: FnMut(&Thread) -> ControlFlow<()>,
    {
        self.inner.registry.traverse(visitor)
    }

    /// Names of all live threads in id order
    pub fn thread_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.traverse(|thread| {
            names.push(thread.name().to_owned());
            ControlFlow::Continue(())
        });
        names
    }

    /// Register the calling native thread (e.g. `main`) as a real-time
    /// thread until the returned guard is dropped
    #[track_caller]
    pub fn adopt_current_thread(&self, name: &str) -> AdoptedThread {
        AdoptedThread {
            thread: Thread::adopt(self, name),
            runtime: self.clone(),
        }
    }

    /// Allocate a thread-local storage key. Exhaustion is fatal under the
    /// runtime's policy.
    #[track_caller]
    pub fn allocate_tls(&self) -> TlsKey {
        match self.try_allocate_tls() {
            Ok(key) => key,
            Err(err) => self.fatal(err),
        }
    }

    /// Allocate a thread-local storage key, returning exhaustion as an error
    pub fn try_allocate_tls(&self) -> SystemResult<TlsKey> {
        self.inner.tls.allocate()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Fatal errors and shutdown
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Escalate under this runtime's fatal policy
    #[track_caller]
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        fatal::raise_with(self.inner.config.fatal_policy, message)
    }

    /// Register a handler notified before the process exits, whether through
    /// [`Runtime::shutdown`] or a fatal error under `FatalPolicy::Exit`
    pub fn register_shutdown_handler(&self, handler: Arc<dyn ShutdownHandler>) {
        shutdown::register_handler(handler);
    }

    /// Notify the shutdown handlers and exit with the code they settle on
    pub fn shutdown(&self, exit_code: i32) -> ! {
        info!(exit_code, live_threads = self.inner.registry.len(), "runtime shutdown requested");
        shutdown::exit(exit_code)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Virtual time driver
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Advance virtual time (see [`SimTickEngine::advance`])
    pub fn advance(&self, ticks: u64) -> bool {
        self.inner.sim.advance(ticks)
    }

    /// Current virtual tick
    pub fn current_tick(&self) -> u64 {
        self.inner.sim.current()
    }
}

/// Guard returned by [`Runtime::adopt_current_thread`]
#[derive(Debug)]
pub struct AdoptedThread {
    thread: Thread,
    runtime: Runtime,
}

impl AdoptedThread {
    /// Handle of the adopted thread
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

impl Drop for AdoptedThread {
    fn drop(&mut self) {
        self.thread.release_adopted(&self.runtime);
    }
}
