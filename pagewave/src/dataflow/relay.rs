//! Channel-backed event pipes.
//!
//! `Relay` is the engine's plain event pipe: a clonable sender over an
//! unbounded channel, silently dropping events once the receiver is
//! gone. `SignalRelay` is the command-side variant used for `append()` /
//! `retry()`: a unit signal coalesced through a pending flag, so issuing
//! the command any number of times before the sequencer consumes it
//! wakes the sequencer exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::{FusedStream, Stream};
use thiserror::Error;

/// The receiver half of a relay was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("relay receiver dropped")]
pub struct RelayClosed;

/// Clonable sender half of an unbounded event pipe.
#[derive(Clone, Debug)]
pub struct Relay<T> {
    sender: UnboundedSender<T>,
}

impl<T> Relay<T> {
    /// Creates a relay with its receiver stream.
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (sender, receiver) = unbounded();
        (Relay { sender }, receiver)
    }

    /// Sends an event. Events sent after the receiver is dropped are
    /// silently discarded; use [`Relay::try_send`] to observe that.
    pub fn send(&self, value: T) {
        let _ = self.sender.unbounded_send(value);
    }

    /// Sends an event, reporting a dropped receiver.
    pub fn try_send(&self, value: T) -> Result<(), RelayClosed> {
        self.sender.unbounded_send(value).map_err(|_| RelayClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Creates a relay with its receiver stream.
pub fn relay<T>() -> (Relay<T>, UnboundedReceiver<T>) {
    Relay::new()
}

/// Coalesced unit-signal sender: at most one signal is ever queued.
#[derive(Clone, Debug)]
pub struct SignalRelay {
    sender: UnboundedSender<()>,
    pending: Arc<AtomicBool>,
}

impl SignalRelay {
    pub fn new() -> (SignalRelay, SignalStream) {
        let (sender, receiver) = unbounded();
        let pending = Arc::new(AtomicBool::new(false));
        (
            SignalRelay { sender, pending: Arc::clone(&pending) },
            SignalStream { receiver, pending, terminated: false },
        )
    }

    /// Raises the signal. Signalling again before the stream consumed
    /// the previous raise coalesces into that raise.
    pub fn signal(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.unbounded_send(());
    }
}

/// Receiving end of a [`SignalRelay`].
pub struct SignalStream {
    receiver: UnboundedReceiver<()>,
    pending: Arc<AtomicBool>,
    terminated: bool,
}

impl std::fmt::Debug for SignalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalStream")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl SignalStream {
    /// Discards any queued signal. Used by the sequencer after a load
    /// finishes: requests raised while the load was in flight were
    /// issued against a state that disallowed them, so they are dropped
    /// rather than replayed against the new state.
    pub fn clear(&mut self) {
        while let Ok(Some(())) = self.receiver.try_next() {}
        self.pending.store(false, Ordering::Release);
    }
}

impl Stream for SignalStream {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll_next(cx) {
            Poll::Ready(Some(())) => {
                this.pending.store(false, Ordering::Release);
                Poll::Ready(Some(()))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for SignalStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
