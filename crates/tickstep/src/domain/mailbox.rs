//! # Mailbox
//!
//! Unbounded FIFO of messages dispatched by an event-loop thread.
//!
//! # Overview
//! - [`Mailbox::post`] transfers ownership of a message to the queue and
//!   wakes the owning loop.
//! - [`Mailbox::post_sync`] additionally blocks the caller on its own thread
//!   semaphore until the message has been processed, then hands the message
//!   back so results travel inside it.
//! - [`Mailbox::process_messages`] dispatches **at most one** message and is
//!   called once per loop pass, after flags and timers.
//!
//! [`MailboxServer`] bundles an [`EventLoop`] and a mailbox into a
//! [`Runnable`].

use crate::domain::event_loop::EventLoop;
use crate::domain::thread::{Runnable, Thread};
use crate::error::{SystemError, SystemResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Unit of work executed on the mailbox thread
pub trait Message: Send + 'static {
    /// Run the message on the mailbox thread
    fn process(&mut self);
}

/// [`Message`] wrapping a one-shot closure
pub struct FnMessage<F> {
    body: Option<F>,
}

impl<F> FnMessage<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Wrap `body`
    pub fn new(body: F) -> Self {
        Self { body: Some(body) }
    }
}

impl<F> Message for FnMessage<F>
where
    F: FnOnce() + Send + 'static,
{
    fn process(&mut self) {
        if let Some(body) = self.body.take() {
            body();
        }
    }
}

/// Carries a synchronous request and the slot its reply lands in
struct SyncReturn<M> {
    message: Option<M>,
    reply: Arc<Mutex<Option<M>>>,
    caller: Thread,
}

impl<M: Message> Message for SyncReturn<M> {
    fn process(&mut self) {
        if let Some(mut message) = self.message.take() {
            message.process();
            *self.reply.lock() = Some(message);
        }
        self.caller.signal();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mailbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// FIFO message queue bound to one event loop
pub struct Mailbox {
    queue: Mutex<VecDeque<Box<dyn Message>>>,
    event_loop: Arc<EventLoop>,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.queue.lock().len())
            .finish()
    }
}

impl Mailbox {
    /// Mailbox that wakes `event_loop` on every post
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            event_loop,
        }
    }

    /// Loop this mailbox wakes
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Queue `message` and wake the loop
    pub fn post<M: Message>(&self, message: M) {
        self.post_boxed(Box::new(message));
    }

    /// Queue an already boxed message
    pub fn post_boxed(&self, message: Box<dyn Message>) {
        self.queue.lock().push_back(message);
        self.event_loop.signal();
    }

    /// Queue a closure
    pub fn post_fn<F>(&self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(FnMessage::new(body));
    }

    /// Queue `message`, block until it has been processed, and return it.
    ///
    /// The caller must be a registered thread (it waits on its own thread
    /// semaphore). Called from the mailbox's own thread the message is
    /// processed inline.
    pub fn post_sync<M: Message>(&self, mut message: M) -> SystemResult<M> {
        let caller = Thread::try_current().ok_or(SystemError::NotRegistered {
            operation: "post_sync",
        })?;

        if self.event_loop.is_loop_thread() {
            message.process();
            return Ok(message);
        }

        let reply = Arc::new(Mutex::new(None));
        self.post(SyncReturn {
            message: Some(message),
            reply: Arc::clone(&reply),
            caller,
        });

        loop {
            Thread::wait();
            if let Some(message) = reply.lock().take() {
                return Ok(message);
            }
        }
    }

    /// Whether a message is queued
    pub fn is_pending_message(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        !self.is_pending_message()
    }

    /// Dispatch at most one message. Returns whether one was processed.
    pub fn process_messages(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some(mut message) => {
                message.process();
                trace!("mailbox message processed");
                true
            }
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mailbox server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event loop that dispatches one mailbox message per pass
#[derive(Debug)]
pub struct MailboxServer {
    event_loop: Arc<EventLoop>,
    mailbox: Mailbox,
}

impl MailboxServer {
    /// Server over a fresh loop with the given timeout
    #[track_caller]
    pub fn new(timeout_ms: u64) -> Self {
        Self::from_event_loop(EventLoop::new(timeout_ms))
    }

    /// Server over a configured loop
    pub fn from_event_loop(event_loop: EventLoop) -> Self {
        let event_loop = Arc::new(event_loop);
        Self {
            mailbox: Mailbox::new(Arc::clone(&event_loop)),
            event_loop,
        }
    }

    /// The underlying loop
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// The mailbox
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// See [`Mailbox::post`]
    pub fn post<M: Message>(&self, message: M) {
        self.mailbox.post(message);
    }

    /// See [`Mailbox::post_sync`]
    pub fn post_sync<M: Message>(&self, message: M) -> SystemResult<M> {
        self.mailbox.post_sync(message)
    }
}

impl Runnable for MailboxServer {
    fn app_run(&self) {
        self.event_loop.run_with(|| {
            self.mailbox.process_messages();
            self.mailbox.is_pending_message()
        });
    }

    fn please_stop(&self) {
        self.event_loop.please_stop();
    }

    fn set_thread_of_execution(&self, thread: &Thread) {
        self.event_loop.set_thread_of_execution(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_message_per_pass_in_fifo_order() {
        let event_loop = Arc::new(EventLoop::new(1));
        let mailbox = Mailbox::new(Arc::clone(&event_loop));
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            mailbox.post_fn(move || order.lock().push(n));
        }
        assert_eq!(mailbox.len(), 3);

        for expected in 1..=3 {
            assert!(event_loop.wait_and_process_events(true));
            assert!(mailbox.process_messages());
            assert_eq!(order.lock().len(), expected);
        }
        assert!(!mailbox.process_messages());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_post_signals_loop() {
        let event_loop = Arc::new(EventLoop::new(1_000));
        let mailbox = Mailbox::new(Arc::clone(&event_loop));
        mailbox.post_fn(|| {});
        assert!(mailbox.is_pending_message());
        let start = std::time::Instant::now();
        assert!(event_loop.wait_and_process_events(false));
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_post_sync_requires_registered_thread() {
        let server = MailboxServer::new(1);
        let result = std::thread::spawn(move || server.post_sync(FnMessage::new(|| {})).is_err())
            .join()
            .expect("helper panicked");
        assert!(result);
    }
}
