//! # Threads
//!
//! Thread handles, the [`Runnable`] contract, the live-thread registry and
//! thread-local storage slots.
//!
//! # Overview
//! Threads are created through [`crate::Runtime::create_thread`] and torn
//! down with [`crate::Runtime::destroy_thread`]. Each one owns a "thread
//! semaphore" that peers signal with [`Thread::signal`] and the thread
//! itself waits on with [`Thread::wait`].

mod handle;
pub mod registry;
pub mod runnable;
pub mod tls;
pub mod types;

pub use handle::Thread;
pub use registry::ThreadRegistry;
pub use runnable::{RunOnce, Runnable};
pub use tls::{TlsAllocator, TlsKey};
pub use types::{Priority, ThreadId, ThreadOptions};
