//! Synchronization primitives
//!
//! Counting [`Semaphore`] with thread-context and privileged signal entry
//! points, and a recursive [`Mutex`].

pub mod mutex;
pub mod semaphore;

pub use mutex::{Mutex, ScopeBlock};
pub use semaphore::{Semaphore, SEMAPHORE_MAX_COUNT};
