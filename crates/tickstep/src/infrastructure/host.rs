//! Host thread context
//!
//! Each registered thread resolves its own [`Thread`] handle (and, when it
//! runs on virtual time, its [`SimBinding`]) exactly once at entry and keeps
//! it in a `thread_local!` slot. Lookups clone the `Arc`s out so no borrow of
//! the slot is ever held across a blocking call.
//!
//! TLS values are keyed by the owning runtime, so two runtimes in one
//! process never see each other's slots.

use crate::domain::simtick::SimBinding;
use crate::domain::thread::Thread;
use std::cell::RefCell;

/// What a registered thread knows about itself
#[derive(Debug, Clone)]
pub struct ThreadContext {
    /// Handle of the calling thread
    pub thread: Thread,
    /// Virtual-time binding, present only for participating threads
    pub sim: Option<SimBinding>,
}

thread_local! {
    static CURRENT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
    static TLS_VALUES: RefCell<Vec<(u64, Vec<usize>)>> = const { RefCell::new(Vec::new()) };
}

/// Install the context of the calling thread. Returns `false` if one is
/// already installed (the existing context is kept).
pub fn install(context: ThreadContext) -> bool {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(context);
        true
    })
}

/// Remove the calling thread's context and its TLS values
pub fn clear() {
    CURRENT.with(|slot| slot.borrow_mut().take());
    TLS_VALUES.with(|values| values.borrow_mut().clear());
}

/// Handle of the calling thread, if it is registered
pub fn current_thread() -> Option<Thread> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|ctx| ctx.thread.clone()))
}

/// Virtual-time binding of the calling thread, if it participates
pub fn sim_binding() -> Option<SimBinding> {
    CURRENT.with(|slot| slot.borrow().as_ref().and_then(|ctx| ctx.sim.clone()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread-local storage slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Value stored in slot `index` of runtime `owner` for the calling thread
/// (0 when unset)
pub fn tls_get(owner: u64, index: usize) -> usize {
    TLS_VALUES.with(|tables| {
        tables
            .borrow()
            .iter()
            .find(|(id, _)| *id == owner)
            .and_then(|(_, values)| values.get(index).copied())
            .unwrap_or(0)
    })
}

/// Store `value` in slot `index` of runtime `owner` for the calling thread
pub fn tls_set(owner: u64, index: usize, value: usize) {
    TLS_VALUES.with(|tables| {
        let mut tables = tables.borrow_mut();
        let position = match tables.iter().position(|(id, _)| *id == owner) {
            Some(position) => position,
            None => {
                tables.push((owner, Vec::new()));
                tables.len() - 1
            }
        };
        let values = &mut tables[position].1;
        if values.len() <= index {
            values.resize(index + 1, 0);
        }
        values[index] = value;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_thread_has_no_context() {
        std::thread::spawn(|| {
            assert!(current_thread().is_none());
            assert!(sim_binding().is_none());
        })
        .join()
        .expect("helper panicked");
    }

    #[test]
    fn test_tls_slots_are_per_thread() {
        tls_set(1, 3, 42);
        assert_eq!(tls_get(1, 3), 42);
        assert_eq!(tls_get(1, 0), 0);
        std::thread::spawn(|| assert_eq!(tls_get(1, 3), 0))
            .join()
            .expect("helper panicked");
        clear();
        assert_eq!(tls_get(1, 3), 0);
    }

    #[test]
    fn test_tls_slots_are_per_owner() {
        tls_set(7, 0, 11);
        tls_set(8, 0, 22);
        assert_eq!(tls_get(7, 0), 11);
        assert_eq!(tls_get(8, 0), 22);
        assert_eq!(tls_get(9, 0), 0);
    }
}
