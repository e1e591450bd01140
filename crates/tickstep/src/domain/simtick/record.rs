//! Per-thread virtual-time record

use crate::domain::sync::Semaphore;
use crate::domain::thread::ThreadId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Virtual-time bookkeeping owned by one participating thread
///
/// Created by the engine when the thread starts and retired when it exits.
/// `cur_ticks` is only written while the engine's tick lock is held.
#[derive(Debug)]
pub struct SimTickRecord {
    thread_id: ThreadId,
    cur_ticks: AtomicU64,
    pub(super) waiter: Semaphore,
    ack_pending: AtomicBool,
}

impl SimTickRecord {
    pub(super) fn new(thread_id: ThreadId, cur_ticks: u64) -> Self {
        Self {
            thread_id,
            cur_ticks: AtomicU64::new(cur_ticks),
            waiter: Semaphore::new(0),
            ack_pending: AtomicBool::new(false),
        }
    }

    /// Owning thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Last global tick this thread has consumed
    pub fn cur_ticks(&self) -> u64 {
        self.cur_ticks.load(Ordering::Acquire)
    }

    pub(super) fn set_cur_ticks(&self, ticks: u64) {
        self.cur_ticks.store(ticks, Ordering::Release);
    }

    /// Whether the driver is waiting on this thread to settle the current tick
    pub fn is_ack_pending(&self) -> bool {
        self.ack_pending.load(Ordering::Acquire)
    }

    pub(super) fn mark_ack_pending(&self) {
        self.ack_pending.store(true, Ordering::Release);
    }

    /// Clear the pending flag, returning whether it was set
    pub(super) fn take_ack_pending(&self) -> bool {
        self.ack_pending.swap(false, Ordering::AcqRel)
    }
}
