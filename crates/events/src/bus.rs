//! Observer publish/subscribe abstraction (mechanics only).
//!
//! Observers (UI views, report builders) subscribe once and then receive every
//! [`SyncEvent`](crate::SyncEvent) the coordinator publishes:
//!
//! - **Synchronous**: `publish` returns after the message is handed to every
//!   live subscriber; nothing waits on the network.
//! - **Ordered per publisher**: a subscriber sees messages in publish order.
//! - **Full values**: messages carry whole collections, so a subscriber that
//!   only keeps the latest message per collection is always up to date.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to the observer stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = coordinator.subscribe();
/// for event in sub.drain() {
///     view.apply(event);
/// }
/// ```
///
/// Designed for single-threaded consumption, like the UI loop that owns it.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything published since the last read, in order.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Publish/subscribe contract for change notifications.
///
/// `Send + Sync` so the coordinator can publish from subscription callbacks
/// running on runtime worker threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
