//! Fatal Error Escalation
//!
//! Usage errors (calling a thread-only operation from a foreign thread,
//! zero-length periods, driving virtual time from a participating thread)
//! are unrecoverable, and so are resource failures the caller chose not to
//! recover from (see [`Runtime::try_create_thread`](crate::Runtime::try_create_thread)).
//! They are logged and then handled according to a [`FatalPolicy`].
//!
//! # Policy scope
//! Operations that reach a [`Runtime`](crate::Runtime) apply that runtime's
//! policy through [`raise_with`]. Context-free checks (an unregistered
//! [`Thread::current`](crate::Thread::current), driving virtual time from a
//! participant) use the process-wide policy, which the most recently built
//! runtime installs.
//!
//! `Exit` notifies the [`shutdown`](super::shutdown) handlers before the
//! process terminates.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::shutdown;

/// What happens after a fatal error has been logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalPolicy {
    /// Terminate the process with the given exit code
    Exit(i32),
    /// Panic the calling thread (used by test harnesses)
    Panic,
}

impl Default for FatalPolicy {
    fn default() -> Self {
        Self::Exit(1)
    }
}

static PROCESS_POLICY: Lazy<RwLock<FatalPolicy>> = Lazy::new(|| RwLock::new(FatalPolicy::default()));

/// Install the policy applied by [`raise`]
pub fn set_policy(policy: FatalPolicy) {
    *PROCESS_POLICY.write() = policy;
}

/// Currently installed policy
pub fn policy() -> FatalPolicy {
    *PROCESS_POLICY.read()
}

/// Log `message` and halt according to the process-wide policy
#[track_caller]
pub fn raise(message: impl fmt::Display) -> ! {
    raise_with(policy(), message)
}

/// Log `message` and halt according to `policy`
#[track_caller]
pub fn raise_with(policy: FatalPolicy, message: impl fmt::Display) -> ! {
    let location = std::panic::Location::caller();
    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");
    tracing::error!(thread = thread_name, %location, "FATAL: {message}");

    match policy {
        FatalPolicy::Exit(code) => shutdown::exit(code),
        FatalPolicy::Panic => panic!("fatal error: {message}"),
    }
}
