//! Timer identifiers and queue entries

use std::cmp::Ordering;
use std::fmt;

/// Timer identifier, unique within one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Wrap a raw identifier
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Heap entry for one start of a timer
#[derive(Debug, Clone)]
pub(crate) struct ScheduledTimer {
    /// Absolute expiry time in milliseconds
    pub deadline: u64,
    /// Start order, breaks deadline ties
    pub seq: u64,
    /// Owning timer
    pub id: TimerId,
    /// Slot generation when this entry was queued
    pub generation: u64,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline is greatest so BinaryHeap pops it first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(deadline: u64, seq: u64) -> ScheduledTimer {
        ScheduledTimer {
            deadline,
            seq,
            id: TimerId::new(seq),
            generation: 0,
        }
    }

    #[test]
    fn test_earlier_deadline_first() {
        assert!(entry(10, 2) > entry(20, 1));
    }

    #[test]
    fn test_start_order_breaks_ties() {
        assert!(entry(10, 1) > entry(10, 2));
    }
}
