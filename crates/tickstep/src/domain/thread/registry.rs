//! Live-thread registry
//!
//! Threads insert themselves on entry and remove themselves on exit. The
//! lock is short and non-reentrant: a traverse visitor must not create or
//! destroy threads.

use super::{Thread, ThreadId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide (per runtime) list of live threads
#[derive(Debug)]
pub struct ThreadRegistry {
    threads: Mutex<BTreeMap<ThreadId, Thread>>,
    next_id: AtomicU64,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next identifier
    pub fn next_id(&self) -> ThreadId {
        ThreadId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, thread: Thread) {
        self.threads.lock().insert(thread.id(), thread);
    }

    pub(crate) fn remove(&self, id: ThreadId) -> Option<Thread> {
        self.threads.lock().remove(&id)
    }

    /// Number of live threads
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// True when no thread is registered
    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// Look up a live thread
    pub fn get(&self, id: ThreadId) -> Option<Thread> {
        self.threads.lock().get(&id).cloned()
    }

    /// Find a live thread by name (first match in id order)
    pub fn find_by_name(&self, name: &str) -> Option<Thread> {
        self.threads
            .lock()
            .values()
            .find(|thread| thread.name() == name)
            .cloned()
    }

    /// Visit live threads in id order under the registry lock. Returns
    /// `false` if the visitor stopped early.
    pub fn traverse<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&Thread) -> ControlFlow<()>,
    {
        let threads = self.threads.lock();
        for thread in threads.values() {
            if visitor(thread).is_break() {
                return false;
            }
        }
        true
    }
}
