//! # tickstep
//!
//! Portable concurrency substrate: threads and synchronization primitives,
//! a cooperative event-and-timer loop, mailbox message passing, a monotonic
//! periodic scheduler, and a virtual-time engine that advances selected
//! threads in deterministic lock-step under test.
//!
//! # Architecture
//! - [`domain`]: scheduling logic (sync, threads, timers, event loop,
//!   mailbox, periodic scheduler, virtual time)
//! - [`infrastructure`]: host services (clock, thread context, fatal errors,
//!   shutdown handlers)
//! - [`runtime`]: the [`Runtime`] context object tying them together
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use tickstep::{MailboxServer, Runtime, ThreadOptions};
//!
//! let runtime = Runtime::builder().build();
//! let server = Arc::new(MailboxServer::new(10));
//! let thread = runtime.create_thread(server.clone(), "server", ThreadOptions::default());
//! server.mailbox().post_fn(|| println!("hello from the server thread"));
//! server.event_loop().please_stop();
//! runtime.destroy_thread(&thread).unwrap();
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod runtime;

pub use domain::elapsed::{self, Precision};
pub use domain::event_loop::{EventFlagHandler, EventLoop, EVENT_FLAG_COUNT};
pub use domain::mailbox::{FnMessage, Mailbox, MailboxServer, Message};
pub use domain::periodic::{Interval, PeriodicEventLoop, PeriodicScheduler};
pub use domain::simtick::{SimTickConfig, SimTickEngine};
pub use domain::sync::{Mutex, ScopeBlock, Semaphore, SEMAPHORE_MAX_COUNT};
pub use domain::thread::{
    Priority, RunOnce, Runnable, Thread, ThreadId, ThreadOptions, ThreadRegistry, TlsKey,
};
pub use domain::timer::{Timer, TimerManager};
pub use error::{SystemError, SystemResult};
pub use infrastructure::{FatalPolicy, ShutdownHandler};
pub use runtime::{AdoptedThread, Runtime, RuntimeBuilder, RuntimeConfig};
