//! Unit of work executed by a [`Thread`]

use super::Thread;
use parking_lot::Mutex;

/// Code run by a thread
///
/// `app_run` is the single blocking entry point. `please_stop` is an
/// advisory request: implementations wake themselves up and unwind
/// cooperatively. The thread's running flag ([`Thread::is_running`]) is the
/// only externally observable lifecycle state.
pub trait Runnable: Send + Sync + 'static {
    /// Thread body. The thread exits when this returns.
    fn app_run(&self);

    /// Ask the body to return as soon as possible
    fn please_stop(&self) {}

    /// Called on the new thread, before `app_run`, with its own handle
    fn set_thread_of_execution(&self, _thread: &Thread) {}
}

/// [`Runnable`] wrapping a one-shot closure
pub struct RunOnce<F> {
    body: Mutex<Option<F>>,
}

impl<F> RunOnce<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Wrap `body`
    pub fn new(body: F) -> Self {
        Self {
            body: Mutex::new(Some(body)),
        }
    }
}

impl<F> Runnable for RunOnce<F>
where
    F: FnOnce() + Send + 'static,
{
    fn app_run(&self) {
        let body = self.body.lock().take();
        if let Some(body) = body {
            body();
        }
    }
}

/// Body of an adopted native thread; never run
pub(crate) struct Adopted;

impl Runnable for Adopted {
    fn app_run(&self) {}
}
