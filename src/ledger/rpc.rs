//! JSON-RPC ledger client.
//!
//! Talks to an EVM node over HTTP via `ethers`' provider. Node error
//! messages are carried through verbatim in `LedgerError::Rpc` so the
//! sequencer can recognise nonce mismatches by their text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Ledger;
use crate::types::{hex32, LedgerError, Receipt, SignedTransaction, TxHash};

const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(2);
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct RpcLedger {
    provider: Provider<Http>,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl RpcLedger {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;

        Ok(Self {
            provider,
            receipt_poll: DEFAULT_RECEIPT_POLL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    /// Override how often and for how long receipts are polled.
    pub fn with_receipt_polling(mut self, poll: Duration, timeout: Duration) -> Self {
        self.receipt_poll = poll;
        self.receipt_timeout = timeout;
        self
    }
}

impl From<ProviderError> for LedgerError {
    fn from(err: ProviderError) -> Self {
        if let Some(rpc) = err.as_error_response() {
            return LedgerError::Rpc {
                code: rpc.code,
                message: rpc.message.clone(),
            };
        }
        if let Some(serde_err) = err.as_serde_error() {
            return LedgerError::Decode(serde_err.to_string());
        }
        LedgerError::Transport(err.to_string())
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(r: TransactionReceipt) -> Self {
        Receipt {
            tx_hash: r.transaction_hash,
            // A receipt without a status field is not proof of success.
            status: r.status.map(|s| s.as_u64()).unwrap_or(0),
            block_number: r.block_number.map(|b| b.as_u64()),
            gas_used: r.gas_used,
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_nonce(&self, account: Address) -> Result<u64, LedgerError> {
        let count = self
            .provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await?;
        debug!(?account, nonce = %count, "Fetched transaction count");
        Ok(count.low_u64())
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, LedgerError> {
        let pending = self.provider.send_raw_transaction(tx.raw.clone()).await?;
        Ok(*pending)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, LedgerError> {
        let deadline = Instant::now() + self.receipt_timeout;

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt.into()),
                Ok(None) => {}
                Err(e) => {
                    // The transaction is already out; keep polling through blips.
                    warn!(tx_hash = %hex32(&hash), error = %e, "Receipt poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::Timeout(hash));
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let tx: TypedTransaction = ethers::types::TransactionRequest::new()
            .to(to)
            .data(data)
            .into();
        let out = self.provider.call(&tx, None).await?;
        Ok(out)
    }
}
