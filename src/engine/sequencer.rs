//! Transaction sequencer.
//!
//! Owns the operator account's nonce and serialises the
//! read-nonce → build → sign → broadcast step across every caller (HTTP
//! handlers, the expiry monitor, the market creator). The lock is released
//! as soon as the node accepts the transaction; waiting for the receipt
//! happens outside it, so the next caller can allocate the following nonce
//! while earlier transactions are still being mined.
//!
//! Each submission gets a bounded number of attempts with randomised
//! exponential backoff. Only transient network failures and nonce
//! conflicts are retried. A nonce conflict resynchronises the local nonce
//! from the chain before the next attempt.

use ethers::types::{Address, U256};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::contract::ContractCall;
use crate::ledger::{Ledger, TransactionSigner};
use crate::types::{
    hex32, LedgerError, SubmitError, TransactionOutcome, TransactionRequest, TxHash,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Total attempts per submission, including the first.
    pub max_attempts: u32,
    /// Backoff multiplier: attempt `n` waits up to `base * 2^n`.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff wait.
    pub backoff_cap: Duration,
    /// Pause before re-reading the chain nonce after a conflict, giving
    /// in-flight transactions time to land.
    pub nonce_cooldown: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
            nonce_cooldown: Duration::from_secs(10),
        }
    }
}

/// Random wait before retry number `attempt` (1-based): uniform in
/// `[0, min(cap, base * 2^(attempt - 1))]`: up to `base` after the first
/// failure, `2 * base` after the second.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let upper = exp.min(cap);
    if upper.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..=upper)
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Credentials and nonce of the operator account. Only ever touched while
/// the sequencer's lock is held.
struct SignerState {
    signer: Arc<dyn TransactionSigner>,
    account: Address,
    nonce: u64,
}

pub struct Sequencer {
    ledger: Arc<dyn Ledger>,
    state: Mutex<SignerState>,
    config: SequencerConfig,
}

impl Sequencer {
    /// Create a sequencer starting from a known nonce.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        signer: Arc<dyn TransactionSigner>,
        nonce: u64,
        config: SequencerConfig,
    ) -> Self {
        let account = signer.address();
        Self {
            ledger,
            state: Mutex::new(SignerState {
                signer,
                account,
                nonce,
            }),
            config,
        }
    }

    /// Create a sequencer, initialising the nonce from the chain.
    pub async fn connect(
        ledger: Arc<dyn Ledger>,
        signer: Arc<dyn TransactionSigner>,
        config: SequencerConfig,
    ) -> Result<Self, LedgerError> {
        let account = signer.address();
        let nonce = ledger.get_nonce(account).await?;
        info!(?account, nonce, "Sequencer initialised from chain nonce");
        Ok(Self::new(ledger, signer, nonce, config))
    }

    /// Next nonce the sequencer will allocate.
    pub async fn current_nonce(&self) -> u64 {
        self.state.lock().await.nonce
    }

    pub async fn account(&self) -> Address {
        self.state.lock().await.account
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Submit `call` with `value` wei attached and wait for its receipt.
    ///
    /// Never panics or returns early on error: every failure is folded
    /// into `TransactionOutcome::Errored`.
    pub async fn submit(&self, call: ContractCall, value: U256) -> TransactionOutcome {
        let function = call.function_name();
        let question_id = hex32(&call.question_id());
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 0;
        let hash = loop {
            attempt += 1;
            match self.broadcast_next(&call, value).await {
                Ok(hash) => break hash,
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay =
                        backoff_delay(attempt, self.config.backoff_base, self.config.backoff_cap);
                    warn!(
                        function,
                        question_id = %question_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submission attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        function,
                        question_id = %question_id,
                        attempt,
                        error = %e,
                        "Submission abandoned"
                    );
                    return TransactionOutcome::Errored {
                        cause: format!("{function} failed after {attempt} attempt(s): {e}"),
                    };
                }
            }
        };

        // Lock already released; only this caller waits on the receipt.
        match self.ledger.wait_for_receipt(hash).await {
            Ok(receipt) if receipt.succeeded() => {
                info!(
                    function,
                    question_id = %question_id,
                    tx_hash = %hex32(&hash),
                    block = ?receipt.block_number,
                    "Transaction succeeded"
                );
                TransactionOutcome::Succeeded { hash }
            }
            Ok(receipt) => {
                warn!(
                    function,
                    question_id = %question_id,
                    tx_hash = %hex32(&hash),
                    block = ?receipt.block_number,
                    "Transaction reverted"
                );
                TransactionOutcome::Failed {
                    hash,
                    reason: format!("{function} reverted for question_id: {question_id}"),
                }
            }
            Err(e) => {
                error!(
                    function,
                    tx_hash = %hex32(&hash),
                    error = %e,
                    "Receipt unavailable"
                );
                TransactionOutcome::Errored {
                    cause: format!("receipt for {} unavailable: {e}", hex32(&hash)),
                }
            }
        }
    }

    /// One attempt of the exclusive section: allocate the nonce, sign and
    /// broadcast. The nonce advances only when the node accepts the
    /// transaction.
    async fn broadcast_next(
        &self,
        call: &ContractCall,
        value: U256,
    ) -> Result<TxHash, SubmitError> {
        let mut state = self.state.lock().await;

        let request = TransactionRequest {
            call: call.clone(),
            value,
            nonce: state.nonce,
        };
        let signed = state.signer.sign(&request)?;

        match self.ledger.broadcast(&signed).await {
            Ok(hash) => {
                state.nonce += 1;
                info!(
                    function = call.function_name(),
                    nonce = request.nonce,
                    tx_hash = %hex32(&hash),
                    "Submitted transaction"
                );
                Ok(hash)
            }
            Err(e) if e.is_nonce_conflict() => {
                warn!(nonce = request.nonce, error = %e, "Nonce conflict on broadcast");
                tokio::time::sleep(self.config.nonce_cooldown).await;

                let fresh = self
                    .ledger
                    .get_nonce(state.account)
                    .await
                    .map_err(|e| SubmitError::Transient(format!("nonce resync failed: {e}")))?;
                state.nonce = fresh;
                info!(nonce = fresh, "Nonce reset from chain");

                Err(SubmitError::NonceConflict { resynced_to: fresh })
            }
            Err(e) if e.is_transient() => Err(SubmitError::Transient(e.to_string())),
            Err(e) => Err(SubmitError::Rejected(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
