//! Operator API driven end to end: router → sequencer → simulated chain.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use oracle_operator::engine::sequencer::{Sequencer, SequencerConfig};
use oracle_operator::server::build_router;
use oracle_operator::server::routes::{Envelope, ServerState};

use crate::fakes::{FakeChain, RecordingSigner};

const TOKEN: &str = "operator-token";

async fn router_on(chain: &Arc<FakeChain>) -> axum::Router {
    let sequencer = Sequencer::connect(
        chain.clone(),
        RecordingSigner::new(),
        SequencerConfig {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            nonce_cooldown: Duration::ZERO,
        },
    )
    .await
    .unwrap();
    build_router(Arc::new(ServerState::new(
        Arc::new(sequencer),
        SecretString::new(TOKEN.to_string()),
    )))
}

fn initialize_request(question: u8) -> Request<Body> {
    let body = serde_json::json!({
        "question_id": format!("0x{}", hex::encode([question; 32])),
        "random_index": 0,
        "market_end_timestamp": 1_700_003_600u64,
        "price_update_data": ["0x504e4155"],
        "value": 10_000_000_000u64,
        "auth_token": TOKEN
    });
    Request::builder()
        .method(Method::POST)
        .uri("/initializeMarket")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn read_envelope(resp: axum::response::Response) -> Envelope {
    let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_concurrent_initializations_from_nonce_five() {
    let chain = FakeChain::new(5);
    let app = router_on(&chain).await;
    chain.occupy_nonce(6);

    let (a, b) = tokio::join!(
        app.clone().oneshot(initialize_request(0xa1)),
        app.clone().oneshot(initialize_request(0xb2)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let (a, b) = (read_envelope(a).await, read_envelope(b).await);
    assert!(a.info.success, "{}", a.info.response);
    assert!(b.info.success, "{}", b.info.response);
    assert_ne!(a.request_id, b.request_id);

    assert_eq!(chain.attempts(), vec![5, 6, 7]);
    assert_eq!(chain.accepted_nonces(), vec![5, 7]);
}

#[tokio::test]
async fn test_reverted_initialization_reports_failure_with_200() {
    let chain = FakeChain::new(0);
    let app = router_on(&chain).await;
    chain.revert_at(0);

    let resp = app.oneshot(initialize_request(0x01)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let env = read_envelope(resp).await;
    assert!(!env.info.success);
    assert_eq!(
        env.info.response,
        format!("tx failed for question_id: 0x{}", "01".repeat(32))
    );
    assert_eq!(chain.attempts(), vec![0]);
}
