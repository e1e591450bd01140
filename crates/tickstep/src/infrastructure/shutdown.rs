//! Application shutdown
//!
//! Handlers registered here run when the application shuts down, either
//! explicitly through [`success`] / [`failure`] (or
//! [`Runtime::shutdown`](crate::Runtime::shutdown)) or when a fatal error
//! exits the process under [`FatalPolicy::Exit`](super::FatalPolicy::Exit).
//!
//! # Exit code chaining
//! Handlers are notified in registration order on the thread that started
//! the shutdown. Each receives the exit code produced so far and returns the
//! code to pass on; returning the argument leaves it unchanged.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Exit code used by [`success`]
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Default exit code for [`failure`]
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Callback notified before the process exits
pub trait ShutdownHandler: Send + Sync {
    /// Called with the current exit code; returns the code to continue with
    fn notify(&self, exit_code: i32) -> i32;
}

impl<F> ShutdownHandler for F
where
    F: Fn(i32) -> i32 + Send + Sync,
{
    fn notify(&self, exit_code: i32) -> i32 {
        self(exit_code)
    }
}

static HANDLERS: Lazy<Mutex<Vec<Arc<dyn ShutdownHandler>>>> = Lazy::new(|| Mutex::new(Vec::new()));
static NOTIFYING: AtomicBool = AtomicBool::new(false);

/// Register a handler for the rest of the process lifetime
pub fn register_handler(handler: Arc<dyn ShutdownHandler>) {
    HANDLERS.lock().push(handler);
}

/// Number of registered handlers
pub fn handler_count() -> usize {
    HANDLERS.lock().len()
}

/// Run every registered handler and return the final exit code.
///
/// A shutdown started from inside a handler (for example a fatal error
/// raised while tearing down) skips the handlers and keeps `exit_code`.
pub fn notify_handlers(exit_code: i32) -> i32 {
    if NOTIFYING.swap(true, Ordering::AcqRel) {
        debug!(exit_code, "shutdown already in progress");
        return exit_code;
    }
    // Snapshot so handlers may register further handlers without deadlocking
    let handlers: Vec<Arc<dyn ShutdownHandler>> = HANDLERS.lock().clone();
    let code = handlers
        .iter()
        .fold(exit_code, |code, handler| handler.notify(code));
    NOTIFYING.store(false, Ordering::Release);
    code
}

/// Notify the handlers, then exit with the resulting code
pub fn exit(exit_code: i32) -> ! {
    let code = notify_handlers(exit_code);
    info!(requested = exit_code, exit_code = code, "shutting down");
    std::process::exit(code)
}

/// Shut down with [`SUCCESS_EXIT_CODE`]
pub fn success() -> ! {
    exit(SUCCESS_EXIT_CODE)
}

/// Shut down with a failure code
pub fn failure(exit_code: i32) -> ! {
    exit(exit_code)
}
