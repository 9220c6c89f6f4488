//! In-memory chain, signer, registry and price feed for integration tests.
//!
//! `FakeChain` keeps a single account's nonce the way a node would: a
//! broadcast is accepted only at the next expected nonce, and nonces taken
//! by transactions from elsewhere are skipped. Receipts can be held back
//! or forced to revert per nonce.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use oracle_operator::contract::{ContractCall, MarketReader};
use oracle_operator::ledger::{Ledger, TransactionSigner};
use oracle_operator::pricefeed::PriceFeed;
use oracle_operator::types::*;

pub const OPERATOR: Address = Address::repeat_byte(0x0a);

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChainState {
    next_nonce: u64,
    /// Nonces consumed by transactions this operator did not send.
    external: HashSet<u64>,
    /// Hash -> nonce of every accepted broadcast.
    accepted: HashMap<TxHash, u64>,
    /// Nonce of every broadcast attempt, accepted or not, in arrival order.
    attempts: Vec<u64>,
    /// Errors returned by the next broadcasts before any nonce check.
    scripted: VecDeque<LedgerError>,
    reverting: HashSet<u64>,
    held: HashMap<u64, Arc<Notify>>,
}

impl ChainState {
    fn skip_external(&mut self) {
        while self.external.contains(&self.next_nonce) {
            self.next_nonce += 1;
        }
    }
}

pub struct FakeChain {
    state: Mutex<ChainState>,
    nonce_reads: AtomicUsize,
}

impl FakeChain {
    pub fn new(next_nonce: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                next_nonce,
                ..ChainState::default()
            }),
            nonce_reads: AtomicUsize::new(0),
        })
    }

    /// Another sender's transaction lands at `nonce`.
    pub fn occupy_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().unwrap();
        state.external.insert(nonce);
        state.skip_external();
    }

    /// Queue an error for the next broadcast.
    pub fn fail_next_broadcast(&self, err: LedgerError) {
        self.state.lock().unwrap().scripted.push_back(err);
    }

    /// The transaction mined at `nonce` reverts (receipt status 0).
    pub fn revert_at(&self, nonce: u64) {
        self.state.lock().unwrap().reverting.insert(nonce);
    }

    /// Hold the receipt for `nonce` until the returned handle is notified.
    pub fn hold_receipt(&self, nonce: u64) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().held.insert(nonce, gate.clone());
        gate
    }

    pub fn attempts(&self) -> Vec<u64> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn accepted_nonces(&self) -> Vec<u64> {
        let mut nonces: Vec<u64> = self.state.lock().unwrap().accepted.values().copied().collect();
        nonces.sort_unstable();
        nonces
    }

    pub fn nonce_reads(&self) -> usize {
        self.nonce_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for FakeChain {
    async fn get_nonce(&self, _account: Address) -> Result<u64, LedgerError> {
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().next_nonce)
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(tx.nonce);

        if let Some(err) = state.scripted.pop_front() {
            return Err(err);
        }
        if tx.nonce < state.next_nonce {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("nonce too low: next nonce {}, tx nonce {}", state.next_nonce, tx.nonce),
            });
        }
        if tx.nonce > state.next_nonce {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("nonce too high: next nonce {}, tx nonce {}", state.next_nonce, tx.nonce),
            });
        }

        state.accepted.insert(tx.hash, tx.nonce);
        state.next_nonce += 1;
        state.skip_external();
        Ok(tx.hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, LedgerError> {
        let (nonce, gate) = {
            let state = self.state.lock().unwrap();
            let nonce = *state
                .accepted
                .get(&hash)
                .ok_or_else(|| LedgerError::Decode(format!("unknown transaction {hash:?}")))?;
            (nonce, state.held.get(&nonce).cloned())
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        let status = if self.state.lock().unwrap().reverting.contains(&nonce) { 0 } else { 1 };
        Ok(Receipt {
            tx_hash: hash,
            status,
            block_number: Some(nonce + 100),
            gas_used: None,
        })
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, LedgerError> {
        Err(LedgerError::Decode("FakeChain does not serve contract reads".into()))
    }
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Records every request it signs. The hash encodes the nonce so tests can
/// map outcomes back to allocations.
#[derive(Default)]
pub struct RecordingSigner {
    signed: Mutex<Vec<TransactionRequest>>,
}

impl RecordingSigner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signed(&self) -> Vec<TransactionRequest> {
        self.signed.lock().unwrap().clone()
    }

    /// Question ids of `resolveMarket` calls signed so far.
    pub fn resolved_ids(&self) -> Vec<QuestionId> {
        self.signed()
            .into_iter()
            .filter_map(|req| match req.call {
                ContractCall::ResolveMarket { question_id, .. } => Some(question_id),
                _ => None,
            })
            .collect()
    }
}

pub fn hash_for_nonce(nonce: u64) -> TxHash {
    H256::from_low_u64_be(0x1_0000 + nonce)
}

impl TransactionSigner for RecordingSigner {
    fn address(&self) -> Address {
        OPERATOR
    }

    fn sign(&self, request: &TransactionRequest) -> Result<SignedTransaction, SubmitError> {
        self.signed.lock().unwrap().push(request.clone());
        Ok(SignedTransaction {
            raw: Bytes::from(request.nonce.to_be_bytes().to_vec()),
            hash: hash_for_nonce(request.nonce),
            nonce: request.nonce,
        })
    }
}

// ---------------------------------------------------------------------------
// Market registry
// ---------------------------------------------------------------------------

pub fn market(id: u64, end_timestamp: u64) -> MarketRecord {
    MarketRecord {
        question_id: H256::from_low_u64_be(id),
        end_timestamp,
        pool: Address::from_low_u64_be(0xf00d),
        price_feed_id: H256::from_low_u64_be(0xfeed),
        resolved: false,
    }
}

pub struct FakeRegistry {
    markets: Mutex<Vec<MarketRecord>>,
    unreadable: Mutex<HashSet<QuestionId>>,
    /// If set, listing active markets returns this error.
    force_error: Mutex<Option<String>>,
}

impl FakeRegistry {
    pub fn new(markets: Vec<MarketRecord>) -> Arc<Self> {
        Arc::new(Self {
            markets: Mutex::new(markets),
            unreadable: Mutex::new(HashSet::new()),
            force_error: Mutex::new(None),
        })
    }

    pub fn make_unreadable(&self, id: u64) {
        self.unreadable.lock().unwrap().insert(H256::from_low_u64_be(id));
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl MarketReader for FakeRegistry {
    async fn active_market_ids(&self) -> Result<Vec<QuestionId>, LedgerError> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(LedgerError::Transport(msg));
        }
        Ok(self.markets.lock().unwrap().iter().map(|m| m.question_id).collect())
    }

    async fn market_data(&self, question_id: QuestionId) -> Result<MarketRecord, LedgerError> {
        if self.unreadable.lock().unwrap().contains(&question_id) {
            return Err(LedgerError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            });
        }
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.question_id == question_id)
            .cloned()
            .ok_or_else(|| LedgerError::Decode("no such market".into()))
    }
}

// ---------------------------------------------------------------------------
// Price feed
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticPriceFeed {
    requests: AtomicUsize,
}

impl StaticPriceFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn fetch_update(&self, _feed_id: H256) -> Result<Vec<Bytes>, PriceFeedError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Bytes::from(vec![0x50, 0x4e, 0x41, 0x55])])
    }
}
