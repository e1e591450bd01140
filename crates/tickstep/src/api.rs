//! Calling-thread helpers
//!
//! Sleep that honours virtual time, plus re-exports of the virtual-time
//! intercepts for code that only needs the free functions.

use crate::infrastructure::{clock, host};

pub use crate::domain::simtick::{application_wait, top_level_wait, using_sim_ticks};

/// Sleep `ms` milliseconds. Participating threads sleep in virtual ticks.
pub fn sleep(ms: u64) {
    match host::sim_binding() {
        Some(binding) => binding.sleep(ms),
        None => clock::sleep_ms(ms),
    }
}

/// Sleep `ms` real milliseconds regardless of virtual time
pub fn sleep_in_real_time(ms: u64) {
    clock::sleep_ms(ms);
}
