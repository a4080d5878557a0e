use alloy_primitives::Bytes;

/// The unit of data a batch carries per L2 block: number, timestamp and the
/// raw transactions.  Parenthood is implicit in sequence order; no hashes
/// cross the L1 boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DerivationBlock {
    pub number: u64,
    pub timestamp: u64,
    pub txs: Vec<Bytes>,
}

impl DerivationBlock {
    pub fn new(number: u64, timestamp: u64, txs: Vec<Bytes>) -> Self {
        Self {
            number,
            timestamp,
            txs,
        }
    }

    /// Total tx payload size in bytes.
    pub fn tx_bytes(&self) -> usize {
        self.txs.iter().map(|tx| tx.len()).sum()
    }
}
