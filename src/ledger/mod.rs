//! Chain access.
//!
//! Defines the `Ledger` trait the sequencer and monitor talk to, the
//! JSON-RPC implementation used in production (`rpc`), and transaction
//! signing for the single operator account (`signer`).

pub mod rpc;
pub mod signer;

use async_trait::async_trait;
use ethers::types::{Address, Bytes};

use crate::types::{LedgerError, Receipt, SignedTransaction, TxHash};

/// Abstraction over a remote chain node.
///
/// Every method is a network round-trip and may fail transiently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Transaction count of `account`, i.e. the next nonce the chain expects.
    async fn get_nonce(&self, account: Address) -> Result<u64, LedgerError>;

    /// Submit a signed transaction. Returns its hash once the node accepts it.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, LedgerError>;

    /// Block until the transaction is mined and return its receipt.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, LedgerError>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;
}

pub use rpc::RpcLedger;
pub use signer::{GasSettings, LocalSigner, TransactionSigner};
