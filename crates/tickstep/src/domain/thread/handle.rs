//! Thread handle and lifecycle
//!
//! # Design
//! A [`Thread`] is a cheap clone of an `Arc` shared by the creator, the
//! registry and the host thread itself. Entry and exit run on the new host
//! thread:
//!
//! - entry: virtual-time opt-in, context install, registration, startup
//!   handshake, `app_run`
//! - exit (drop guard, so it also runs on unwind): clear the running flag,
//!   acknowledge any pending tick, deregister, drop the context
//!
//! The creator blocks on the handshake, so a returned handle is already
//! registered and visible to `traverse`.

use super::runnable::Runnable;
use super::types::{Priority, ThreadId, ThreadOptions};
use crate::domain::simtick::SimBinding;
use crate::domain::sync::Semaphore;
use crate::error::{SystemError, SystemResult};
use crate::infrastructure::host::{self, ThreadContext};
use crate::infrastructure::fatal;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

struct ThreadInner {
    id: ThreadId,
    name: String,
    priority: Priority,
    sema: Semaphore,
    runnable: Arc<dyn Runnable>,
    running: AtomicBool,
    uses_sim_ticks: bool,
    native: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a runtime thread
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .field("sim_ticks", &self.inner.uses_sim_ticks)
            .finish()
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Thread {}

impl Thread {
    fn from_parts(
        id: ThreadId,
        name: &str,
        options: &ThreadOptions,
        runnable: Arc<dyn Runnable>,
        uses_sim_ticks: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                name: name.to_owned(),
                priority: options.priority,
                sema: Semaphore::new(0),
                runnable,
                running: AtomicBool::new(false),
                uses_sim_ticks,
                native: Mutex::new(None),
            }),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Identifier
    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Priority hint given at creation
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// True between entry and exit of the thread body
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Whether the thread runs on virtual time
    pub fn uses_sim_ticks(&self) -> bool {
        self.inner.uses_sim_ticks
    }

    /// The work this thread executes
    pub fn runnable(&self) -> &Arc<dyn Runnable> {
        &self.inner.runnable
    }

    /// Signal the thread semaphore. Thread context only.
    pub fn signal(&self) {
        self.inner.sema.signal();
    }

    /// Privileged signal of the thread semaphore
    pub fn su_signal(&self) {
        self.inner.sema.su_signal();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Calling-thread operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Handle of the calling thread. Fatal if it was never registered.
    #[track_caller]
    pub fn current() -> Thread {
        match host::current_thread() {
            Some(thread) => thread,
            None => fatal::raise("Thread::current() called from a thread that was never registered"),
        }
    }

    /// Handle of the calling thread, if registered
    pub fn try_current() -> Option<Thread> {
        host::current_thread()
    }

    /// Name of the calling thread
    #[track_caller]
    pub fn my_name() -> String {
        Self::current().name().to_owned()
    }

    /// Identifier of the calling thread
    #[track_caller]
    pub fn my_id() -> ThreadId {
        Self::current().id()
    }

    /// Block on the calling thread's semaphore
    #[track_caller]
    pub fn wait() {
        Self::current().inner.sema.wait();
    }

    /// Non-blocking take of the calling thread's semaphore
    #[track_caller]
    pub fn try_wait() -> bool {
        Self::current().inner.sema.try_wait()
    }

    /// Timed wait on the calling thread's semaphore
    #[track_caller]
    pub fn timed_wait(timeout_ms: u64) -> bool {
        Self::current().inner.sema.timed_wait(timeout_ms)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Start a host thread running `runnable`
    pub(crate) fn spawn(
        runtime: &Runtime,
        runnable: Arc<dyn Runnable>,
        name: &str,
        options: ThreadOptions,
    ) -> SystemResult<Thread> {
        let id = runtime.registry().next_id();
        let uses_sim_ticks = options.allow_sim_ticks && runtime.config().sim_ticks;
        let thread = Thread::from_parts(id, name, &options, runnable, uses_sim_ticks);
        let started = Arc::new(Semaphore::new(0));

        let mut builder = std::thread::Builder::new().name(name.to_owned());
        if let Some(bytes) = options.stack_size {
            builder = builder.stack_size(bytes);
        }

        let entry = {
            let runtime = runtime.clone();
            let thread = thread.clone();
            let started = Arc::clone(&started);
            move || thread_entry(runtime, thread, started)
        };
        let handle = builder.spawn(entry).map_err(|source| SystemError::Spawn {
            name: name.to_owned(),
            source,
        })?;
        *thread.inner.native.lock() = Some(handle);

        started.wait_in_real_time();
        info!(thread = %name, %id, priority = options.priority.value(), sim_ticks = uses_sim_ticks, "thread created");
        Ok(thread)
    }

    /// Register the calling native thread as a real-time thread
    pub(crate) fn adopt(runtime: &Runtime, name: &str) -> Thread {
        let id = runtime.registry().next_id();
        let thread = Thread::from_parts(
            id,
            name,
            &ThreadOptions::default().real_time(),
            Arc::new(super::runnable::Adopted),
            false,
        );
        let installed = host::install(ThreadContext {
            thread: thread.clone(),
            sim: None,
        });
        if !installed {
            runtime.fatal(format!("cannot adopt '{name}': the calling thread is already registered"));
        }
        thread.inner.running.store(true, Ordering::Release);
        runtime.registry().insert(thread.clone());
        debug!(thread = %name, %id, "native thread adopted");
        thread
    }

    pub(crate) fn release_adopted(&self, runtime: &Runtime) {
        self.inner.running.store(false, Ordering::Release);
        runtime.registry().remove(self.id());
        host::clear();
        debug!(thread = %self.name(), "adopted thread released");
    }

    /// Tear down a thread whose body has (ideally) already returned
    pub(crate) fn destroy(&self, runtime: &Runtime) -> SystemResult<()> {
        if host::current_thread().is_some_and(|me| me == *self) {
            return Err(SystemError::SelfDestroy(self.id()));
        }

        if self.is_running() {
            self.inner.runnable.please_stop();
            crate::api::sleep(runtime.config().destroy_grace.as_millis() as u64);
            if self.is_running() {
                warn!(thread = %self.name(), id = %self.id(), "thread still running after stop request, detaching it");
                runtime.registry().remove(self.id());
                drop(self.inner.native.lock().take());
                return Ok(());
            }
        }

        let handle = self.inner.native.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(thread = %self.name(), "thread body panicked");
            }
        }
        debug!(thread = %self.name(), "thread destroyed");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Host thread entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExitGuard<'a> {
    runtime: &'a Runtime,
    thread: &'a Thread,
    sim: Option<SimBinding>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.thread.inner.running.store(false, Ordering::Release);
        if let Some(sim) = &self.sim {
            sim.engine.on_thread_exit(&sim.record);
        }
        self.runtime.registry().remove(self.thread.id());
        host::clear();
        debug!(thread = %self.thread.name(), "thread exited");
    }
}

fn thread_entry(runtime: Runtime, thread: Thread, started: Arc<Semaphore>) {
    let sim = thread.uses_sim_ticks().then(|| {
        let engine = Arc::clone(runtime.sim());
        let record = engine.thread_init(thread.id());
        SimBinding { engine, record }
    });
    host::install(ThreadContext {
        thread: thread.clone(),
        sim: sim.clone(),
    });
    runtime.registry().insert(thread.clone());

    let _exit = ExitGuard {
        runtime: &runtime,
        thread: &thread,
        sim,
    };
    thread.inner.running.store(true, Ordering::Release);
    thread.inner.runnable.set_thread_of_execution(&thread);
    started.signal();

    thread.inner.runnable.app_run();
}
