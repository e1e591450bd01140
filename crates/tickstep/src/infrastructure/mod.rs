//! Host threading provider
//!
//! Everything that touches the operating system: the real-time clock,
//! per-thread context and storage, fatal-error escalation and shutdown
//! handlers.

pub mod clock;
pub mod fatal;
pub mod host;
pub mod shutdown;

pub use fatal::FatalPolicy;
pub use shutdown::ShutdownHandler;
