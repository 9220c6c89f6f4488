//! Nonce allocation, conflict recovery and outcome classification against
//! a simulated chain.

use ethers::types::{H256, U256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oracle_operator::contract::ContractCall;
use oracle_operator::engine::sequencer::{Sequencer, SequencerConfig};
use oracle_operator::types::{LedgerError, TransactionOutcome};

use crate::fakes::{hash_for_nonce, FakeChain, RecordingSigner};

fn fast_config() -> SequencerConfig {
    SequencerConfig {
        max_attempts: 3,
        backoff_base: Duration::ZERO,
        backoff_cap: Duration::ZERO,
        nonce_cooldown: Duration::ZERO,
    }
}

fn create_call(id: u64) -> ContractCall {
    ContractCall::CreateMarket {
        question_id: H256::from_low_u64_be(id),
        random_index: 0,
        market_end_timestamp: 1_700_000_600,
        price_update_data: vec![],
    }
}

async fn connect(chain: &Arc<FakeChain>, signer: &Arc<RecordingSigner>) -> Arc<Sequencer> {
    Arc::new(
        Sequencer::connect(chain.clone(), signer.clone(), fast_config())
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_concurrent_submits_get_contiguous_nonces() {
    let chain = FakeChain::new(40);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let seq = seq.clone();
            tokio::spawn(async move { seq.submit(create_call(i), U256::zero()).await })
        })
        .collect();
    let outcomes = futures::future::join_all(handles).await;

    for outcome in outcomes {
        assert!(outcome.unwrap().is_success());
    }
    assert_eq!(chain.accepted_nonces(), (40..48).collect::<Vec<_>>());
    let attempted: HashSet<u64> = chain.attempts().into_iter().collect();
    assert_eq!(attempted.len(), 8, "no nonce was broadcast twice");
    assert_eq!(seq.current_nonce().await, 48);
    assert_eq!(chain.nonce_reads(), 1);
}

#[tokio::test]
async fn test_held_receipt_does_not_block_next_allocation() {
    let chain = FakeChain::new(0);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;
    let gate = chain.hold_receipt(0);

    let first = {
        let seq = seq.clone();
        tokio::spawn(async move { seq.submit(create_call(1), U256::zero()).await })
    };
    // Let the first call broadcast and park on its receipt.
    while chain.attempts().is_empty() {
        tokio::task::yield_now().await;
    }

    let second = tokio::time::timeout(Duration::from_secs(5), seq.submit(create_call(2), U256::zero()))
        .await
        .expect("second submission blocked behind a pending receipt");
    assert_eq!(second, TransactionOutcome::Succeeded { hash: hash_for_nonce(1) });
    assert!(!first.is_finished());

    gate.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first, TransactionOutcome::Succeeded { hash: hash_for_nonce(0) });
}

#[tokio::test]
async fn test_conflict_with_external_transaction_resyncs_once() {
    // Two concurrent initialisations from nonce 5; nonce 6 is taken by a
    // transaction from another sender before ours arrives.
    let chain = FakeChain::new(5);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;
    chain.occupy_nonce(6);

    let a = {
        let seq = seq.clone();
        tokio::spawn(async move { seq.submit(create_call(1), U256::zero()).await })
    };
    let b = {
        let seq = seq.clone();
        tokio::spawn(async move { seq.submit(create_call(2), U256::zero()).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.is_success());
    assert!(b.is_success());
    let mut hashes = vec![a.tx_hash().unwrap(), b.tx_hash().unwrap()];
    hashes.sort();
    assert_eq!(hashes, vec![hash_for_nonce(5), hash_for_nonce(7)]);

    assert_eq!(chain.attempts(), vec![5, 6, 7]);
    assert_eq!(chain.accepted_nonces(), vec![5, 7]);
    // connect + one resync
    assert_eq!(chain.nonce_reads(), 2);
    assert_eq!(seq.current_nonce().await, 8);
}

#[tokio::test]
async fn test_stale_local_nonce_recovers_on_second_attempt() {
    let chain = FakeChain::new(3);
    let signer = RecordingSigner::new();
    let seq = Sequencer::new(chain.clone(), signer.clone(), 1, fast_config());

    let outcome = seq.submit(create_call(9), U256::from(10u64)).await;

    assert_eq!(outcome, TransactionOutcome::Succeeded { hash: hash_for_nonce(3) });
    assert_eq!(chain.attempts(), vec![1, 3]);
    assert_eq!(chain.nonce_reads(), 1);
    let signed = signer.signed();
    assert_eq!(signed.len(), 2);
    assert_eq!(signed[1].value, U256::from(10u64));
}

#[tokio::test]
async fn test_reverted_transaction_is_terminal() {
    let chain = FakeChain::new(0);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;
    chain.revert_at(0);

    let outcome = seq.submit(create_call(1), U256::zero()).await;

    assert!(matches!(outcome, TransactionOutcome::Failed { hash, .. } if hash == hash_for_nonce(0)));
    assert_eq!(chain.attempts(), vec![0]);
    assert_eq!(seq.current_nonce().await, 1);
}

#[tokio::test]
async fn test_transient_errors_exhaust_attempt_budget() {
    let chain = FakeChain::new(0);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;
    for _ in 0..3 {
        chain.fail_next_broadcast(LedgerError::Transport("connection reset".into()));
    }

    let outcome = seq.submit(create_call(1), U256::zero()).await;

    match outcome {
        TransactionOutcome::Errored { cause } => assert!(cause.contains("3 attempt(s)"), "{cause}"),
        other => panic!("expected Errored, got {other:?}"),
    }
    assert_eq!(chain.attempts().len(), 3);
    assert!(chain.accepted_nonces().is_empty());
    assert_eq!(seq.current_nonce().await, 0);

    // Budget is per submission; the next one goes through.
    assert!(seq.submit(create_call(2), U256::zero()).await.is_success());
}

#[tokio::test]
async fn test_rejection_spends_a_single_attempt() {
    let chain = FakeChain::new(0);
    let signer = RecordingSigner::new();
    let seq = connect(&chain, &signer).await;
    chain.fail_next_broadcast(LedgerError::Rpc {
        code: -32000,
        message: "insufficient funds for gas * price + value".into(),
    });

    let outcome = seq.submit(create_call(1), U256::zero()).await;

    assert!(matches!(outcome, TransactionOutcome::Errored { .. }));
    assert_eq!(chain.attempts(), vec![0]);
    assert_eq!(chain.nonce_reads(), 1);
}
