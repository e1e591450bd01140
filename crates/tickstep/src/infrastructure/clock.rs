//! Real-time elapsed clock
//!
//! Monotonic milliseconds since the first time the process asked for the
//! time. Only real-time threads (and the virtual-time driver) read this
//! source directly; participating threads see the global tick counter.

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Force the origin to be captured now
pub fn init() {
    Lazy::force(&ORIGIN);
}

/// Milliseconds elapsed since the process origin
pub fn milliseconds() -> u64 {
    ORIGIN.elapsed().as_millis() as u64
}

/// Block the calling host thread
pub fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}
