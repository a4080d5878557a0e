use std::str::FromStr;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::rpc::HttpClient;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("external signer: {0}")]
    External(String),
}

/// Seam between the tx manager and whatever holds the key.  Signer
/// internals (keystores, HSMs) live behind this trait.
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Signs the transaction and returns the raw bytes ready for
    /// `eth_sendRawTransaction`.
    async fn sign_transaction(&self, tx: TxEip1559) -> Result<Bytes, SignerError>;
}

/// Signs with an in-process secp256k1 key.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        let inner = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
            .map_err(|err| SignerError::MalformedKey(err.to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl TxSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_transaction(&self, tx: TxEip1559) -> Result<Bytes, SignerError> {
        let signature = self
            .inner
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|err| SignerError::Signing(err.to_string()))?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        Ok(envelope.encoded_2718().into())
    }
}

#[derive(Deserialize)]
struct SignTransactionResult {
    raw: Bytes,
}

/// Delegates signing to an external clef-style endpoint via
/// `eth_signTransaction`.
pub struct ClefSigner {
    client: HttpClient,
    address: Address,
}

impl ClefSigner {
    pub fn new(endpoint: String, address: Address) -> Self {
        Self {
            client: HttpClient::new(endpoint),
            address,
        }
    }
}

#[async_trait]
impl TxSigner for ClefSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: TxEip1559) -> Result<Bytes, SignerError> {
        let to = match tx.to {
            alloy_primitives::TxKind::Call(addr) => format!("{addr}"),
            alloy_primitives::TxKind::Create => {
                return Err(SignerError::Signing("create txs unsupported".into()))
            }
        };
        let request = json!({
            "from": format!("{}", self.address),
            "to": to,
            "gas": format!("0x{:x}", tx.gas_limit),
            "maxFeePerGas": format!("0x{:x}", tx.max_fee_per_gas),
            "maxPriorityFeePerGas": format!("0x{:x}", tx.max_priority_fee_per_gas),
            "value": format!("0x{:x}", tx.value),
            "nonce": format!("0x{:x}", tx.nonce),
            "data": format!("{}", tx.input),
            "chainId": format!("0x{:x}", U256::from(tx.chain_id)),
        });
        let signed: SignTransactionResult = self
            .client
            .request("eth_signTransaction", vec![request])
            .await
            .map_err(|err| SignerError::External(err.to_string()))?;
        Ok(signed.raw)
    }
}
