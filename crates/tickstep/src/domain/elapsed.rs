//! # Elapsed Time
//!
//! Millisecond time source plus the wrap-safe arithmetic the schedulers use.
//!
//! # Overview
//! Every read is virtual-time aware: a thread that opted into simulated ticks
//! sees the global tick counter, any other thread sees the real monotonic
//! clock. The `*_in_real_time` variants always read the real clock.

use crate::infrastructure::{clock, host};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Precision time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Elapsed time as whole seconds plus thousandths
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Precision {
    /// Whole seconds
    pub seconds: u64,
    /// Milliseconds within the current second (0..1000)
    pub thousandths: u16,
}

impl Precision {
    /// Split a millisecond count
    pub fn from_milliseconds(ms: u64) -> Self {
        Self {
            seconds: ms / 1000,
            thousandths: (ms % 1000) as u16,
        }
    }

    /// Total milliseconds represented
    pub fn as_milliseconds(&self) -> u64 {
        self.seconds * 1000 + u64::from(self.thousandths)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.seconds, self.thousandths)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Time sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Elapsed milliseconds (virtual ticks for participating threads)
pub fn milliseconds() -> u64 {
    match host::sim_binding() {
        Some(binding) => binding.engine.current(),
        None => clock::milliseconds(),
    }
}

/// Elapsed whole seconds
pub fn seconds() -> u64 {
    match host::sim_binding() {
        Some(binding) => binding.engine.seconds(),
        None => seconds_in_real_time(),
    }
}

/// Elapsed time with millisecond precision
pub fn precision() -> Precision {
    Precision::from_milliseconds(milliseconds())
}

/// Real elapsed milliseconds, ignoring virtual time
pub fn milliseconds_in_real_time() -> u64 {
    clock::milliseconds()
}

/// Real elapsed seconds, ignoring virtual time
pub fn seconds_in_real_time() -> u64 {
    clock::milliseconds() / 1000
}

/// Real elapsed time with millisecond precision, ignoring virtual time
pub fn precision_in_real_time() -> Precision {
    Precision::from_milliseconds(clock::milliseconds())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arithmetic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Milliseconds from `start` to `end`
pub fn delta_milliseconds(start: u64, end: u64) -> u64 {
    end.wrapping_sub(start)
}

/// Milliseconds from `start` to now
pub fn delta_since(start: u64) -> u64 {
    delta_milliseconds(start, milliseconds())
}

/// True once `duration` milliseconds have passed since `marker` at time `now`
pub fn expired_milliseconds(marker: u64, duration: u64, now: u64) -> bool {
    delta_milliseconds(marker, now) >= duration
}

/// Round `time` down to a multiple of `period`
pub fn round_down(time: u64, period: u64) -> u64 {
    if period == 0 {
        return time;
    }
    time - time % period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_split() {
        let p = Precision::from_milliseconds(12_345);
        assert_eq!(p.seconds, 12);
        assert_eq!(p.thousandths, 345);
        assert_eq!(p.as_milliseconds(), 12_345);
        assert_eq!(p.to_string(), "12.345");
    }

    #[test]
    fn test_delta_wraps() {
        assert_eq!(delta_milliseconds(10, 25), 15);
        assert_eq!(delta_milliseconds(u64::MAX - 4, 5), 10);
    }

    #[test]
    fn test_expired() {
        assert!(!expired_milliseconds(100, 10, 109));
        assert!(expired_milliseconds(100, 10, 110));
        assert!(expired_milliseconds(100, 0, 100));
    }

    #[test]
    fn test_round_down() {
        assert_eq!(round_down(27, 10), 20);
        assert_eq!(round_down(30, 10), 30);
        assert_eq!(round_down(7, 0), 7);
    }

    #[test]
    fn test_foreign_thread_reads_real_time() {
        let real = milliseconds_in_real_time();
        let seen = milliseconds();
        assert!(seen >= real);
    }
}
