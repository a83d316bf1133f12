//! Session observer: where events and the fatal notification go.

use tokio::sync::mpsc;

use crate::errors::FailureReason;
use crate::port::protocol::Event;

/// Receives asynchronous notifications from one session.
///
/// Callbacks run on the session actor task and must not block.
pub trait SessionObserver: Send + Sync {
    /// A helper `EVENT` line arrived.
    fn on_event(&self, event: Event);

    /// The session failed. Called at most once per session, and never for a
    /// graceful shutdown.
    fn on_fatal(&self, reason: &FailureReason);
}

/// Notification forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A helper event.
    Event(Event),
    /// The session failed.
    Fatal(FailureReason),
}

/// Observer that forwards notifications into an unbounded channel.
///
/// Once the receiver is dropped, notifications are discarded silently.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    /// Observer plus the receiving end of its notification channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: Event) {
        let _ = self.tx.send(Notification::Event(event));
    }

    fn on_fatal(&self, reason: &FailureReason) {
        let _ = self.tx.send(Notification::Fatal(reason.clone()));
    }
}
