//! Encoding and decoding of `appendTxBatch` calldata.
//!
//! A batch is a run of L2 blocks flattened into three parallel sequences:
//! per-block contexts `(num_txs, timestamp)`, per-tx byte lengths, and the
//! concatenated tx bytes.  Both directions enforce the structural
//! invariants, so malformed on-chain data is rejected at the boundary.

use alloy_primitives::{Bytes, U256};
use alloy_sol_types::SolCall;
use thiserror::Error;

use crate::abi::ISequencerInbox;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("context tx count {contexts} does not match tx lengths {lengths}")]
    TxCountMismatch { contexts: u64, lengths: u64 },

    #[error("tx lengths sum {expected} does not match batch size {actual}")]
    TxBytesMismatch { expected: u64, actual: u64 },

    #[error("contexts must come in (num_txs, timestamp) pairs, got {0} words")]
    UnpairedContexts(usize),

    #[error("word out of range: {0}")]
    WordOverflow(U256),

    #[error("abi: {0}")]
    Abi(#[from] alloy_sol_types::Error),
}

/// One L2 block's shape inside a batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BatchContext {
    pub num_txs: u64,
    pub timestamp: u64,
}

/// Decoded form of `appendTxBatch` calldata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchAttributes {
    pub first_l2_block_number: u64,
    pub contexts: Vec<BatchContext>,
    pub tx_lengths: Vec<u32>,
    pub tx_batch: Bytes,
}

impl BatchAttributes {
    pub fn validate(&self) -> Result<(), CodecError> {
        let context_txs: u64 = self.contexts.iter().map(|c| c.num_txs).sum();
        let lengths = self.tx_lengths.len() as u64;
        if context_txs != lengths {
            return Err(CodecError::TxCountMismatch {
                contexts: context_txs,
                lengths,
            });
        }
        let expected: u64 = self.tx_lengths.iter().map(|&l| l as u64).sum();
        let actual = self.tx_batch.len() as u64;
        if expected != actual {
            return Err(CodecError::TxBytesMismatch { expected, actual });
        }
        Ok(())
    }

    /// Number of L2 blocks in the batch.
    pub fn num_blocks(&self) -> u64 {
        self.contexts.len() as u64
    }

    /// L2 block number of the last block in the batch.
    pub fn last_l2_block_number(&self) -> u64 {
        self.first_l2_block_number + self.num_blocks().saturating_sub(1)
    }

    /// Splits `tx_batch` back into per-tx byte strings.  Only valid on
    /// attributes that passed [`Self::validate`].
    pub fn split_txs(&self) -> Vec<Bytes> {
        let mut txs = Vec::with_capacity(self.tx_lengths.len());
        let mut offset = 0usize;
        for &len in &self.tx_lengths {
            let end = offset + len as usize;
            txs.push(Bytes::copy_from_slice(&self.tx_batch[offset..end]));
            offset = end;
        }
        txs
    }
}

/// Encodes attributes into full calldata (selector included).
pub fn encode_batch(attrs: &BatchAttributes) -> Result<Bytes, CodecError> {
    attrs.validate()?;
    let mut contexts = Vec::with_capacity(attrs.contexts.len() * 2);
    for ctx in &attrs.contexts {
        contexts.push(U256::from(ctx.num_txs));
        contexts.push(U256::from(ctx.timestamp));
    }
    let call = ISequencerInbox::appendTxBatchCall {
        contexts,
        txLengths: attrs.tx_lengths.iter().map(|&l| U256::from(l)).collect(),
        firstL2BlockNumber: U256::from(attrs.first_l2_block_number),
        txBatch: attrs.tx_batch.clone(),
    };
    Ok(call.abi_encode().into())
}

/// Decodes full `appendTxBatch` calldata (selector included).
pub fn decode_batch(calldata: &[u8]) -> Result<BatchAttributes, CodecError> {
    let call = ISequencerInbox::appendTxBatchCall::abi_decode(calldata, true)?;

    if call.contexts.len() % 2 != 0 {
        return Err(CodecError::UnpairedContexts(call.contexts.len()));
    }
    let contexts = call
        .contexts
        .chunks_exact(2)
        .map(|pair| {
            Ok(BatchContext {
                num_txs: to_u64(pair[0])?,
                timestamp: to_u64(pair[1])?,
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    let tx_lengths = call
        .txLengths
        .iter()
        .map(|&len| to_u64(len).map(|l| l as u32))
        .collect::<Result<Vec<_>, CodecError>>()?;

    let attrs = BatchAttributes {
        first_l2_block_number: to_u64(call.firstL2BlockNumber)?,
        contexts,
        tx_lengths,
        tx_batch: call.txBatch,
    };
    attrs.validate()?;
    Ok(attrs)
}

fn to_u64(word: U256) -> Result<u64, CodecError> {
    word.try_into().map_err(|_| CodecError::WordOverflow(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchAttributes {
        BatchAttributes {
            first_l2_block_number: 7,
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
            tx_lengths: vec![3, 2, 4],
            tx_batch: Bytes::from_static(b"aaabbcccc"),
        }
    }

    #[test]
    fn test_round_trip() {
        let attrs = sample();
        let calldata = encode_batch(&attrs).unwrap();
        assert_eq!(
            &calldata[..4],
            &ISequencerInbox::appendTxBatchCall::SELECTOR[..]
        );
        let decoded = decode_batch(&calldata).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_split_txs() {
        let txs = sample().split_txs();
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].as_ref(), b"aaa");
        assert_eq!(txs[2].as_ref(), b"cccc");
    }

    #[test]
    fn test_encode_rejects_count_mismatch() {
        let mut attrs = sample();
        attrs.contexts[0].num_txs = 3;
        assert!(matches!(
            encode_batch(&attrs),
            Err(CodecError::TxCountMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_byte_mismatch() {
        let mut attrs = sample();
        attrs.tx_lengths[2] = 5;
        assert!(matches!(
            encode_batch(&attrs),
            Err(CodecError::TxBytesMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_tampered_lengths() {
        let mut attrs = sample();
        let calldata = encode_batch(&attrs).unwrap();

        // Re-encode with an inconsistent length table, bypassing validate.
        attrs.tx_lengths = vec![3, 2, 3];
        let call = ISequencerInbox::appendTxBatchCall {
            contexts: vec![
                U256::from(2),
                U256::from(1_700_000_000u64),
                U256::from(1),
                U256::from(1_700_000_002u64),
            ],
            txLengths: attrs.tx_lengths.iter().map(|&l| U256::from(l)).collect(),
            firstL2BlockNumber: U256::from(7),
            txBatch: attrs.tx_batch.clone(),
        };
        let bad: Bytes = call.abi_encode().into();
        assert_ne!(bad, calldata);
        assert!(matches!(
            decode_batch(&bad),
            Err(CodecError::TxBytesMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_blocks_are_representable() {
        let attrs = BatchAttributes {
            first_l2_block_number: 1,
            contexts: vec![BatchContext {
                num_txs: 0,
                timestamp: 1_700_000_000,
            }],
            tx_lengths: vec![],
            tx_batch: Bytes::new(),
        };
        let decoded = decode_batch(&encode_batch(&attrs).unwrap()).unwrap();
        assert_eq!(decoded, attrs);
        assert!(decoded.split_txs().is_empty());
    }
}
