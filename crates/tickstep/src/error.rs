//! # Recoverable Error Types
//!
//! Failures that have a recoverable path are returned as [`SystemError`].
//! Usage errors (wrong calling context, unregistered thread lookups, invalid
//! configuration) never show up here: they escalate through
//! [`crate::infrastructure::fatal`] instead.

use crate::domain::thread::ThreadId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Recoverable failures reported by the runtime
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// The host threading provider refused to create a thread
    #[error("failed to spawn host thread '{name}': {source}")]
    Spawn {
        /// Requested thread name
        name: String,
        /// Error reported by the host
        #[source]
        source: std::io::Error,
    },

    /// Every thread-local-storage slot of the runtime is in use
    #[error("thread-local storage slots exhausted (limit {limit})")]
    TlsExhausted {
        /// Configured slot limit
        limit: usize,
    },

    /// The operation needs a registered thread (thread semaphore) but the
    /// caller is a foreign thread
    #[error("operation '{operation}' requires a registered thread")]
    NotRegistered {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A thread attempted to destroy its own handle
    #[error("{0} cannot destroy itself")]
    SelfDestroy(ThreadId),
}

impl SystemError {
    /// Returns `true` when retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::TlsExhausted { .. })
    }
}

/// Convenience alias used across the crate
pub type SystemResult<T> = Result<T, SystemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SystemError::TlsExhausted { limit: 8 };
        assert_eq!(err.to_string(), "thread-local storage slots exhausted (limit 8)");

        let err = SystemError::SelfDestroy(ThreadId::new(3));
        assert!(err.to_string().contains("Thread(3)"));
    }

    #[test]
    fn test_transient_classification() {
        let spawn = SystemError::Spawn {
            name: "worker".into(),
            source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads"),
        };
        assert!(spawn.is_transient());
        assert!(!SystemError::NotRegistered { operation: "post_sync" }.is_transient());
    }
}
