//! Recursive mutex
//!
//! The owning thread may lock again without deadlocking; every lock returns
//! a [`ScopeBlock`] and the mutex is released once all of them are dropped.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Scope guard returned by [`Mutex::lock`]; dropping it is the unlock
pub type ScopeBlock<'a> = ReentrantMutexGuard<'a, ()>;

/// Recursive mutual exclusion
#[derive(Debug, Default)]
pub struct Mutex {
    raw: ReentrantMutex<()>,
}

impl Mutex {
    /// Create an unlocked mutex
    pub fn new() -> Self {
        Self {
            raw: ReentrantMutex::new(()),
        }
    }

    /// Block until the mutex is owned by the calling thread
    pub fn lock(&self) -> ScopeBlock<'_> {
        self.raw.lock()
    }

    /// Acquire without blocking
    pub fn try_lock(&self) -> Option<ScopeBlock<'_>> {
        self.raw.try_lock()
    }

    /// Run `f` while holding the lock
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.lock();
        f()
    }

    /// Whether any thread currently owns the mutex
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}
