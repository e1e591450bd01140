//! Thread-local storage slots
//!
//! A [`TlsKey`] names one `usize` slot that every thread sees independently.
//! Keys come from the runtime's [`TlsAllocator`]; values start at 0 and are
//! discarded when the owning thread exits. Keys of different allocators
//! never alias, even when they share an index.

use crate::error::{SystemError, SystemResult};
use crate::infrastructure::host;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Handle to one thread-local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlsKey {
    owner: u64,
    index: usize,
}

impl TlsKey {
    /// Value stored by the calling thread (0 if never set)
    pub fn get(&self) -> usize {
        host::tls_get(self.owner, self.index)
    }

    /// Store a value for the calling thread
    pub fn set(&self, value: usize) {
        host::tls_set(self.owner, self.index, value);
    }

    /// Slot index
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Bounded slot allocator owned by the runtime
#[derive(Debug)]
pub struct TlsAllocator {
    owner: u64,
    next: AtomicUsize,
    limit: usize,
}

impl TlsAllocator {
    /// Allocator handing out at most `limit` keys
    pub fn new(limit: usize) -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            next: AtomicUsize::new(0),
            limit,
        }
    }

    /// Allocate a fresh key
    pub fn allocate(&self) -> SystemResult<TlsKey> {
        let (owner, limit) = (self.owner, self.limit);
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .map(|index| TlsKey { owner, index })
            .map_err(|_| SystemError::TlsExhausted { limit })
    }

    /// Keys handed out so far
    pub fn allocated(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion() {
        let allocator = TlsAllocator::new(2);
        let a = allocator.allocate().expect("first key");
        let b = allocator.allocate().expect("second key");
        assert_ne!(a, b);
        assert!(matches!(
            allocator.allocate(),
            Err(SystemError::TlsExhausted { limit: 2 })
        ));
        assert_eq!(allocator.allocated(), 2);
    }

    #[test]
    fn test_values_are_thread_private() {
        let allocator = TlsAllocator::new(4);
        let key = allocator.allocate().expect("key");
        key.set(99);
        let other = std::thread::spawn(move || {
            let before = key.get();
            key.set(5);
            (before, key.get())
        })
        .join()
        .expect("helper panicked");
        assert_eq!(other, (0, 5));
        assert_eq!(key.get(), 99);
    }

    #[test]
    fn test_allocators_do_not_alias() {
        let first = TlsAllocator::new(1).allocate().expect("first key");
        let second = TlsAllocator::new(1).allocate().expect("second key");
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);

        first.set(3);
        assert_eq!(second.get(), 0);
        second.set(4);
        assert_eq!(first.get(), 3);
    }
}
