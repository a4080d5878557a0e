//! Converts decoded batch attributes into engine payloads.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use keel_bridge::batch::BatchAttributes;
use keel_engine::{EngineResult, ExecutionEngine, PayloadAttributes};
use keel_primitives::block::BlockId;
use tracing::trace;

/// Progress through one batch: the next context to build and where its txs
/// start.  Held by the caller so a transient engine failure resumes at the
/// first unbuilt L2 block instead of rebuilding from the top.
pub struct BatchJob {
    attrs: BatchAttributes,
    txs: Vec<Bytes>,
    next_context: usize,
    tx_offset: usize,
}

impl BatchJob {
    pub fn is_done(&self) -> bool {
        self.next_context >= self.attrs.contexts.len()
    }
}

/// Stateless wrapper over the engine's payload-build API.
pub struct PayloadBuilder<E> {
    engine: Arc<E>,
    suggested_fee_recipient: Address,
}

impl<E: ExecutionEngine> PayloadBuilder<E> {
    pub fn new(engine: Arc<E>, suggested_fee_recipient: Address) -> Self {
        Self {
            engine,
            suggested_fee_recipient,
        }
    }

    pub fn start(&self, attrs: BatchAttributes) -> BatchJob {
        let txs = attrs.split_txs();
        BatchJob {
            attrs,
            txs,
            next_context: 0,
            tx_offset: 0,
        }
    }

    /// Builds the job's next L2 block.  Returns `None` once every context
    /// has been built.  Engine errors pass through unchanged, with the
    /// job's progress intact.
    pub async fn build_next(&self, job: &mut BatchJob) -> EngineResult<Option<BlockId>> {
        if job.is_done() {
            return Ok(None);
        }
        let ctx = job.attrs.contexts[job.next_context];
        let end = job.tx_offset + ctx.num_txs as usize;
        let payload = PayloadAttributes {
            timestamp: ctx.timestamp,
            transactions: job.txs[job.tx_offset..end].to_vec(),
            prev_randao: B256::ZERO,
            suggested_fee_recipient: self.suggested_fee_recipient,
        };
        let id = self.engine.build_payload(payload).await?;
        trace!(%id, "built payload");
        job.next_context += 1;
        job.tx_offset = end;
        Ok(Some(id))
    }

    /// Builds one L2 block per batch context, in order, and returns the
    /// produced block ids.
    pub async fn build_payloads(&self, attrs: &BatchAttributes) -> EngineResult<Vec<BlockId>> {
        let mut job = self.start(attrs.clone());
        let mut ids = Vec::with_capacity(attrs.contexts.len());
        while let Some(id) = self.build_next(&mut job).await? {
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use keel_bridge::batch::BatchContext;
    use keel_engine::stub::StubEngine;

    use super::*;

    fn two_block_batch() -> BatchAttributes {
        BatchAttributes {
            first_l2_block_number: 1,
            contexts: vec![
                BatchContext {
                    num_txs: 2,
                    timestamp: 1_700_000_000,
                },
                BatchContext {
                    num_txs: 1,
                    timestamp: 1_700_000_002,
                },
            ],
            tx_lengths: vec![2, 2, 3],
            tx_batch: Bytes::from_static(b"aabbccc"),
        }
    }

    #[tokio::test]
    async fn test_builds_one_block_per_context() {
        let engine = Arc::new(StubEngine::new(B256::repeat_byte(9)));
        let builder = PayloadBuilder::new(engine.clone(), Address::ZERO);

        let ids = builder.build_payloads(&two_block_batch()).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].number(), 1);
        assert_eq!(ids[1].number(), 2);
        assert_eq!(engine.head_ref().id(), ids[1]);
    }

    #[tokio::test]
    async fn test_job_resumes_where_it_stopped() {
        let engine = Arc::new(StubEngine::new(B256::repeat_byte(9)));
        let builder = PayloadBuilder::new(engine.clone(), Address::ZERO);

        let mut job = builder.start(two_block_batch());
        let first = builder.build_next(&mut job).await.unwrap().unwrap();
        assert_eq!(first.number(), 1);
        assert!(!job.is_done());

        let second = builder.build_next(&mut job).await.unwrap().unwrap();
        assert_eq!(second.number(), 2);
        assert!(job.is_done());
        assert_eq!(builder.build_next(&mut job).await.unwrap(), None);
    }
}
