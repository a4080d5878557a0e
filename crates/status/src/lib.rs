//! Publication of the shared L1 view.
//!
//! The L1 state tracker is the single writer; every other service holds a
//! cheap clone of the [`StatusChannel`] and reads snapshots or follows the
//! head event feed.

use keel_primitives::prelude::*;
use tokio::sync::watch::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Capacity of the head event feed.  A lagging subscriber drops the oldest
/// events and sees a `Lagged` receive error.
const HEAD_EVENT_CAPACITY: usize = 256;

/// Events emitted as the tracker follows the L1 head.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HeadEvent {
    /// A new canonical head extending the previously reported one.
    New(BlockRef),

    /// The new head does not extend the previously reported one; `ancestor`
    /// is the most recent block shared by both chains.
    Reorg {
        new_head: BlockRef,
        ancestor: BlockId,
    },
}

/// A wrapper around the L1 state sender and receivers.
#[derive(Clone, Debug)]
pub struct StatusChannel {
    l1_tx: watch::Sender<L1State>,
    l1_rx: watch::Receiver<L1State>,
    heads_tx: broadcast::Sender<HeadEvent>,
}

impl StatusChannel {
    pub fn new(initial: L1State) -> Self {
        let (l1_tx, l1_rx) = watch::channel(initial);
        let (heads_tx, _) = broadcast::channel(HEAD_EVENT_CAPACITY);
        Self {
            l1_tx,
            l1_rx,
            heads_tx,
        }
    }

    /// Gets the latest [`L1State`] snapshot.
    pub fn l1_state(&self) -> L1State {
        *self.l1_rx.borrow()
    }

    /// Waits until the L1 view changes and returns the new snapshot.
    pub async fn wait_for_l1_change(&self) -> Result<L1State, RecvError> {
        let mut rx = self.l1_rx.clone();
        rx.changed().await?;
        let state = *rx.borrow();
        Ok(state)
    }

    /// Subscribes to the head event feed.  Only events published after the
    /// call are delivered.
    pub fn subscribe_heads(&self) -> broadcast::Receiver<HeadEvent> {
        self.heads_tx.subscribe()
    }

    // Writer methods, used by the L1 state tracker only.

    /// Publishes a new [`L1State`] snapshot.
    pub fn update_l1_state(&self, state: L1State) {
        if self.l1_tx.send(state).is_err() {
            warn!("l1 state receiver dropped");
        }
    }

    /// Publishes a head event.  Dropped silently when nobody subscribed.
    pub fn publish_head_event(&self, event: HeadEvent) {
        let _ = self.heads_tx.send(event);
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(L1State::default())
    }
}

#[cfg(test)]
mod tests {
    use keel_primitives::block::BlockId;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn id(n: u64, b: u8) -> BlockId {
        BlockId::new(n, alloy_b256(b))
    }

    fn alloy_b256(b: u8) -> alloy_primitives::B256 {
        alloy_primitives::B256::repeat_byte(b)
    }

    #[tokio::test]
    async fn test_snapshot_updates() {
        let ch = StatusChannel::default();
        assert_eq!(ch.l1_state(), L1State::default());

        let state = L1State::new(id(10, 1), id(8, 2), id(5, 3));
        ch.update_l1_state(state);
        assert_eq!(ch.l1_state(), state);
    }

    #[tokio::test]
    async fn test_head_feed_is_post_subscription() {
        let ch = StatusChannel::default();
        let early = HeadEvent::New(BlockRef::new(id(1, 1), alloy_b256(0), 100));
        ch.publish_head_event(early);

        let mut rx = ch.subscribe_heads();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let late = HeadEvent::New(BlockRef::new(id(2, 2), alloy_b256(1), 112));
        ch.publish_head_event(late.clone());
        assert_eq!(rx.try_recv().unwrap(), late);
    }
}
