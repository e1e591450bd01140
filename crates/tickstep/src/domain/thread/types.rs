//! Thread identity and creation options

use std::fmt;

/// Runtime-assigned thread identifier (starts at 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Wrap a raw identifier
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Scheduling priority hint. Recorded, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    /// Lowest accepted priority
    pub const LOWEST: Self = Self(0);
    /// Default priority
    pub const NORMAL: Self = Self(50);
    /// Highest accepted priority
    pub const HIGHEST: Self = Self(100);

    /// Priority clamped to `[LOWEST, HIGHEST]`
    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::LOWEST.0, Self::HIGHEST.0))
    }

    /// Raw value
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Options for [`crate::Runtime::create_thread`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Priority hint
    pub priority: Priority,
    /// Host stack size in bytes (`None` = host default)
    pub stack_size: Option<usize>,
    /// Run on virtual time when the runtime has it enabled
    pub allow_sim_ticks: bool,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            stack_size: None,
            allow_sim_ticks: true,
        }
    }
}

impl ThreadOptions {
    /// Set the priority hint
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the host stack size
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Keep this thread on real time even when virtual time is enabled
    pub fn real_time(mut self) -> Self {
        self.allow_sim_ticks = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_clamped() {
        assert_eq!(Priority::new(500), Priority::HIGHEST);
        assert_eq!(Priority::new(-3), Priority::LOWEST);
        assert_eq!(Priority::new(49).value(), 49);
    }

    #[test]
    fn test_options_builder() {
        let options = ThreadOptions::default()
            .with_priority(Priority::new(52))
            .with_stack_size(64 * 1024)
            .real_time();
        assert_eq!(options.priority.value(), 52);
        assert_eq!(options.stack_size, Some(64 * 1024));
        assert!(!options.allow_sim_ticks);
    }

    #[test]
    fn test_thread_id_display() {
        assert_eq!(ThreadId::new(7).to_string(), "Thread(7)");
    }
}
