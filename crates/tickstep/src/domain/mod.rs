//! Portable scheduling logic
//!
//! Nothing in here talks to the operating system directly; host services
//! come from [`crate::infrastructure`].

pub mod elapsed;
pub mod event_loop;
pub mod mailbox;
pub mod periodic;
pub mod simtick;
pub mod sync;
pub mod thread;
pub mod timer;
