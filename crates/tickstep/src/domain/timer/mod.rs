//! # Software Timers
//!
//! One-shot cooperative timers. A [`Timer`] belongs to a [`TimerManager`],
//! which is normally owned by an event loop and driven once per pass, so
//! timer resolution is bounded by the loop's timeout.

pub mod manager;
pub mod types;

pub use manager::{NowFn, TimerCallback, TimerManager};
pub use types::TimerId;

use std::sync::Arc;
use tracing::warn;

/// Handle to a software timer. Dropping it stops and removes the timer.
pub struct Timer {
    id: TimerId,
    manager: Arc<TimerManager>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Timer {
    /// Create a stopped timer that calls `callback` on expiry
    pub fn new<F>(manager: &Arc<TimerManager>, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            id: manager.register(Box::new(callback)),
            manager: Arc::clone(manager),
        }
    }

    /// Identifier within the owning manager
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// (Re)start the timer; a running timer is restarted
    pub fn start(&self, duration_ms: u64) {
        self.manager.start(self.id, duration_ms);
    }

    /// Stop the timer. Idempotent.
    pub fn stop(&self) {
        self.manager.stop(self.id);
    }

    /// Whether the timer is running
    pub fn is_active(&self) -> bool {
        self.manager.is_active(self.id)
    }

    /// Absolute expiry time while running
    pub fn deadline(&self) -> Option<u64> {
        self.manager.deadline(self.id)
    }

    /// Move the (stopped) timer to another manager
    pub fn set_timing_source(&mut self, manager: &Arc<TimerManager>) {
        if Arc::ptr_eq(&self.manager, manager) {
            return;
        }
        match self.manager.unregister(self.id) {
            Some(callback) => {
                self.id = manager.register(callback);
                self.manager = Arc::clone(manager);
            }
            None => warn!(timer = %self.id, "cannot move a timer while its callback is running"),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
    }
}
