//! Shared types for the oracle operator.
//!
//! These types form the data model passed between the sequencer, the
//! expiry monitor, the HTTP surface and the chain/price-feed clients.
//! Chain primitives come from `ethers` so that hashes, addresses and
//! byte blobs keep their wire representation end to end.

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::ContractCall;

/// Hash of a broadcast transaction.
pub type TxHash = H256;

/// Market identifier on the oracle contract (`bytes32`).
pub type QuestionId = H256;

/// Full `0x`-prefixed hex rendering of a 32-byte value.
///
/// `H256`'s `Display` abbreviates the middle, which is useless in logs
/// and API responses.
pub fn hex32(value: &H256) -> String {
    format!("0x{}", hex::encode(value.as_bytes()))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Everything needed to sign one contract transaction.
///
/// Built inside the sequencer's exclusive section with the nonce snapshot
/// taken under the lock; discarded after broadcast. Gas limit, fee caps and
/// chain id are fixed signer configuration and do not live here.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub call: ContractCall,
    /// Native-token amount attached to the call, in wei.
    pub value: U256,
    pub nonce: u64,
}

/// A signed, RLP-encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: TxHash,
    pub nonce: u64,
}

/// Chain confirmation record for a mined transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// 1 = success, 0 = reverted.
    pub status: u64,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status != 0
    }
}

/// Final, caller-visible result of a sequenced submission.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// Mined with a non-zero receipt status.
    Succeeded { hash: TxHash },
    /// Mined but reverted. Terminal, never retried by the sequencer.
    Failed { hash: TxHash, reason: String },
    /// Never reached a receipt: the attempt budget ran out, the node
    /// rejected the transaction, or the receipt could not be obtained.
    Errored { cause: String },
}

impl TransactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Succeeded { .. })
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            TransactionOutcome::Succeeded { hash } | TransactionOutcome::Failed { hash, .. } => {
                Some(*hash)
            }
            TransactionOutcome::Errored { .. } => None,
        }
    }
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Succeeded { hash } => write!(f, "succeeded ({})", hex32(hash)),
            TransactionOutcome::Failed { hash, reason } => {
                write!(f, "failed ({}): {reason}", hex32(hash))
            }
            TransactionOutcome::Errored { cause } => write!(f, "errored: {cause}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// Monitor-local view of one active market, rebuilt on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub question_id: QuestionId,
    /// Unix seconds.
    pub end_timestamp: u64,
    /// FPMM pool backing the market.
    pub pool: Address,
    /// Price feed the market resolves against.
    pub price_feed_id: H256,
    /// Set locally once the monitor has resolved it this process lifetime.
    #[serde(default)]
    pub resolved: bool,
}

impl MarketRecord {
    /// Whether the market is past its deadline plus `delay_secs` at `now`.
    pub fn is_due(&self, now: u64, delay_secs: u64) -> bool {
        now >= self.end_timestamp.saturating_add(delay_secs)
    }

    /// Signed seconds until the deadline (negative once expired).
    pub fn seconds_remaining(&self, now: u64) -> i64 {
        let end = i64::try_from(self.end_timestamp).unwrap_or(i64::MAX);
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        end.saturating_sub(now)
    }

    #[cfg(test)]
    pub fn sample(id: u64, end_timestamp: u64) -> Self {
        MarketRecord {
            question_id: H256::from_low_u64_be(id),
            end_timestamp,
            pool: Address::from_low_u64_be(0xf00d),
            price_feed_id: H256::from_low_u64_be(0xfeed),
            resolved: false,
        }
    }
}

impl fmt::Display for MarketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ends {}, pool {:?})",
            hex32(&self.question_id),
            self.end_timestamp,
            self.pool
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures talking to the chain node.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("timed out waiting for receipt of {0:?}")]
    Timeout(TxHash),

    #[error("decode error: {0}")]
    Decode(String),
}

const REPLACEMENT_UNDERPRICED: &str = "replacement transaction underpriced";

impl LedgerError {
    /// The node refused the transaction because of its nonce.
    ///
    /// Nodes only report this as free text ("nonce too low",
    /// "invalid nonce", ...), so the message is inspected. A pending
    /// transaction already holding the nonce shows up as
    /// "replacement transaction underpriced".
    pub fn is_nonce_conflict(&self) -> bool {
        match self {
            LedgerError::Rpc { message, .. } | LedgerError::Transport(message) => {
                let message = message.to_lowercase();
                message.contains("nonce") || message.contains(REPLACEMENT_UNDERPRICED)
            }
            _ => false,
        }
    }

    /// Network-level failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_) | LedgerError::Timeout(_))
    }
}

/// Failures fetching price-feed update data.
#[derive(Debug, thiserror::Error)]
pub enum PriceFeedError {
    #[error("price feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price feed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("price feed payload invalid: {0}")]
    Decode(String),
}

/// Failure of one attempt inside the sequencer's exclusive section.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    /// Broadcast rejected for its nonce; local nonce was resynchronised.
    #[error("nonce conflict, resynchronised to {resynced_to}")]
    NonceConflict { resynced_to: u64 },

    #[error("transient failure: {0}")]
    Transient(String),

    /// The node refused the transaction for a non-nonce reason.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmitError::NonceConflict { .. } | SubmitError::Transient(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
