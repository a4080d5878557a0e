//! L1 state tracker: the single writer of the shared [`L1State`] view.
//!
//! Long-polls the L1 head, refreshes the safe/finalized pointers whenever a
//! new head shows up, and publishes head events (including reorg markers)
//! through the status channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use keel_common::retry::{Backoff, ExponentialBackoff};
use keel_primitives::prelude::*;
use keel_status::{HeadEvent, StatusChannel};
use keel_tasks::ShutdownGuard;
use tracing::*;

use crate::rpc::{BlockTag, L1Client, RpcClientError};

/// How many recent canonical heads we remember for ancestor lookup during a
/// reorg.  Anything deeper is bounded by finality and treated as fatal.
const RECENT_HEADS_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcClientError),

    #[error("reorg deeper than tracked history (no ancestor above {0})")]
    ReorgTooDeep(u64),
}

struct Tracker<C> {
    client: Arc<C>,
    status: StatusChannel,
    /// Hashes of recently observed canonical headers, keyed by number.
    recent: BTreeMap<u64, alloy_primitives::B256>,
    last_head: Option<BlockRef>,
}

impl<C: L1Client> Tracker<C> {
    fn new(client: Arc<C>, status: StatusChannel) -> Self {
        Self {
            client,
            status,
            recent: BTreeMap::new(),
            last_head: None,
        }
    }

    /// One polling step: observe the current head and deliver every header
    /// between the previously reported head and it.
    async fn step(&mut self) -> Result<(), TrackerError> {
        let head = self.client.header_by_tag(BlockTag::Latest).await?;

        if let Some(prev) = self.last_head {
            if head.hash == prev.hash() {
                return Ok(());
            }
        }

        let from = match self.last_head {
            Some(prev) => prev.number() + 1,
            None => head.number(),
        };

        // Catch up header by header so subscribers see every head.  The
        // final header is the one we already fetched.
        for number in from..=head.number() {
            let header = if number == head.number() {
                head.clone()
            } else {
                match self.client.header_by_number(number).await? {
                    Some(h) => h,
                    // Rewound out from under us; retry next tick.
                    None => return Ok(()),
                }
            };
            self.observe(header.block_ref()).await?;
        }

        // A reorg that shortens the chain never enters the loop above.
        if head.number() < from {
            self.observe(head.block_ref()).await?;
        }
        Ok(())
    }

    async fn observe(&mut self, new_head: BlockRef) -> Result<(), TrackerError> {
        let extends = match self.last_head {
            None => true,
            Some(prev) => new_head.parent_hash() == prev.hash(),
        };

        if extends {
            self.status.publish_head_event(HeadEvent::New(new_head));
        } else {
            let ancestor = self.find_common_ancestor(&new_head).await?;
            warn!(%ancestor, new_head = %new_head.id(), "L1 reorg detected");
            self.recent.split_off(&(ancestor.number() + 1));
            self.status
                .publish_head_event(HeadEvent::Reorg { new_head, ancestor });
        }

        self.recent.insert(new_head.number(), new_head.hash());
        if self.recent.len() > RECENT_HEADS_CAPACITY {
            let oldest = *self.recent.keys().next().expect("tracker: nonempty");
            self.recent.remove(&oldest);
        }
        self.last_head = Some(new_head);

        self.publish_snapshot(new_head.id()).await
    }

    /// Walks the new canonical chain backwards until it meets a header we
    /// reported before.
    async fn find_common_ancestor(&self, new_head: &BlockRef) -> Result<BlockId, TrackerError> {
        let mut number = new_head.number().saturating_sub(1);
        let mut parent = new_head.parent_hash();
        loop {
            if self.recent.get(&number) == Some(&parent) {
                return Ok(BlockId::new(number, parent));
            }
            let Some((&oldest, _)) = self.recent.iter().next() else {
                return Err(TrackerError::ReorgTooDeep(number));
            };
            if number <= oldest {
                return Err(TrackerError::ReorgTooDeep(number));
            }
            let header = self
                .client
                .header_by_number(number)
                .await?
                .ok_or_else(|| TrackerError::ReorgTooDeep(number))?;
            parent = header.parent_hash;
            number -= 1;
        }
    }

    async fn publish_snapshot(&self, head: BlockId) -> Result<(), TrackerError> {
        let safe = self.client.header_by_tag(BlockTag::Safe).await?;
        let finalized = self.client.header_by_tag(BlockTag::Finalized).await?;
        self.status
            .update_l1_state(L1State::new(head, safe.block_id(), finalized.block_id()));
        Ok(())
    }
}

/// Service entry point.  Only returns on shutdown or an unrecoverable
/// tracking failure (reorg past tracked history).
pub async fn state_tracker_task<C: L1Client>(
    client: Arc<C>,
    status: StatusChannel,
    poll_interval: Duration,
    guard: ShutdownGuard,
) -> anyhow::Result<()> {
    let mut tracker = Tracker::new(client, status);
    let backoff = ExponentialBackoff::network();
    let mut delay = backoff.base_delay_ms();

    loop {
        if guard.should_shutdown() {
            info!("state tracker stopping");
            return Ok(());
        }

        let wait = match tracker.step().await {
            Ok(()) => {
                delay = backoff.base_delay_ms();
                poll_interval
            }
            Err(TrackerError::Rpc(err)) => {
                warn!(%err, "L1 poll failed, backing off");
                let wait = Duration::from_millis(delay);
                delay = backoff.next_delay_ms(delay);
                wait
            }
            Err(err @ TrackerError::ReorgTooDeep(_)) => return Err(err.into()),
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = guard.wait_for_shutdown() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use keel_status::HeadEvent;

    use super::*;
    use crate::rpc::testing::MockChainClient;

    fn hash(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    // Block n gets hash(n + 0x10); the genesis hash must not be zero.
    fn scripted_l1(up_to: u64) -> Arc<MockChainClient> {
        let client = Arc::new(MockChainClient::new());
        let headers: Vec<_> = (0..=up_to).map(|n| (n, hash(n as u8 + 0x10))).collect();
        client.extend_chain(&headers);
        client.set_safe(0);
        client.set_finalized(0);
        client
    }

    #[tokio::test]
    async fn test_catches_up_head_by_head() {
        let client = scripted_l1(1);
        client.set_safe(1);

        let status = StatusChannel::default();
        let mut rx = status.subscribe_heads();
        let mut tracker = Tracker::new(client.clone(), status.clone());

        // First observation reports the current head only.
        tracker.step().await.unwrap();
        match rx.try_recv().unwrap() {
            HeadEvent::New(head) => assert_eq!(head.number(), 1),
            other => panic!("unexpected event {other:?}"),
        }

        // The chain grows by two; both heads are delivered in order.
        client.extend_chain(&[(2, hash(0x12)), (3, hash(0x13))]);
        client.set_safe(2);
        tracker.step().await.unwrap();
        for expected in 2..=3u64 {
            match rx.try_recv().unwrap() {
                HeadEvent::New(head) => assert_eq!(head.number(), expected),
                other => panic!("unexpected event {other:?}"),
            }
        }

        let state = status.l1_state();
        assert_eq!(state.head().number(), 3);
        assert_eq!(state.safe().number(), 2);
        assert_eq!(state.finalized().number(), 0);
    }

    #[tokio::test]
    async fn test_reorg_emits_marker_with_ancestor() {
        let client = scripted_l1(1);
        let status = StatusChannel::default();
        let mut tracker = Tracker::new(client.clone(), status.clone());
        tracker.step().await.unwrap();
        client.extend_chain(&[(2, hash(0x12)), (3, hash(0x13))]);
        tracker.step().await.unwrap();

        let mut rx = status.subscribe_heads();
        // Replace block 3 with 3' still on top of block 2.
        client.reorg_to(&[(3, hash(0x33))]);
        tracker.step().await.unwrap();

        match rx.try_recv().unwrap() {
            HeadEvent::Reorg { new_head, ancestor } => {
                assert_eq!(new_head.number(), 3);
                assert_eq!(new_head.hash(), hash(0x33));
                assert_eq!(ancestor, BlockId::new(2, hash(0x12)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(status.l1_state().head().hash(), hash(0x33));
    }
}
