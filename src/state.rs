//! Replay-1 state broadcast
//!
//! A single-slot, multi-subscriber channel for the current [`SessionState`].
//! New subscribers immediately observe the most recently published value
//! (replay depth 1), then every subsequent publication in publish order.
//! Delivery is overwrite-latest: a slow or absent consumer can never block
//! or slow the producer — this is a status channel, not a durable log.

use crate::types::SessionState;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Single-slot broadcast of the orchestrator's current status
///
/// Owned by the composition root (the supervisor) and handed by reference to
/// the background worker and to observers; there is no ambient global state.
///
/// # Examples
///
/// ```
/// use bili_dl::state::StateChannel;
/// use bili_dl::types::SessionState;
///
/// # #[tokio::main]
/// # async fn main() {
/// let channel = StateChannel::new();
/// channel.publish(SessionState::Loading { fraction: 0.5, message: "downloading".into() });
///
/// // A subscriber attaching afterwards still sees the latest value
/// let rx = channel.subscribe();
/// assert!(matches!(*rx.borrow(), SessionState::Loading { .. }));
/// # }
/// ```
#[derive(Debug)]
pub struct StateChannel {
    tx: watch::Sender<SessionState>,
}

impl StateChannel {
    /// Create a channel whose initial value is [`SessionState::Idle`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    /// Publish a new state, replacing the current one.
    ///
    /// Never blocks. Publishing with no subscribers is fine; the value is
    /// retained for whoever attaches next.
    pub fn publish(&self, state: SessionState) {
        // send_replace stores the value even when every receiver is gone
        self.tx.send_replace(state);
    }

    /// The value currently in the slot.
    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Attach a new subscriber.
    ///
    /// The receiver's first `borrow`/`changed` observes the latest published
    /// value before any newer one.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Attach a new subscriber as an async `Stream` of states.
    ///
    /// The stream yields the current value first, then each subsequent
    /// publication (coalescing intermediate values under backpressure).
    pub fn stream(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.tx.subscribe())
    }
}

impl Default for StateChannel {
    fn default() -> Self {
        Self::new()
    }
}
