//! Publish/subscribe abstraction (mechanics only).
//!
//! Read models publish change notifications through a [`MessageBus`]. The bus is
//! the hand-off point to whatever transport fans notifications out to
//! subscribers, so its contract is deliberately thin:
//!
//! - **Fire-and-forget**: `publish` hands the message off and returns; it never
//!   waits for subscribers to process it
//! - **At-least-once**: subscribers may see a message more than once and must be
//!   idempotent
//! - **No persistence**: the event store stays the source of truth; a dropped
//!   notification is recovered by re-reading the read model

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to a bus.
///
/// Each subscription receives its own copy of every message published after it
/// was created (broadcast semantics). Subscriptions are meant to be drained by a
/// single consumer thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every message that is already queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// Implementations must be safe to share across threads; several collection
/// writers publish concurrently.
pub trait MessageBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
