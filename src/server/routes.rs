//! Operator API route handlers.
//!
//! Every response carries the `{info: {success, response}, request_id}`
//! envelope. State is shared via `Arc<ServerState>`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use ethers::types::{Bytes, U256};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::contract::ContractCall;
use crate::engine::sequencer::Sequencer;
use crate::types::{hex32, QuestionId, TransactionOutcome};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ServerState {
    pub sequencer: Arc<Sequencer>,
    auth_token: SecretString,
}

impl ServerState {
    pub fn new(sequencer: Arc<Sequencer>, auth_token: SecretString) -> Self {
        Self {
            sequencer,
            auth_token,
        }
    }

    /// Compare without exiting early on the first differing byte.
    fn token_matches(&self, candidate: &str) -> bool {
        let expected = self.auth_token.expose_secret().as_bytes();
        let candidate = candidate.as_bytes();
        expected.len() == candidate.len()
            && expected
                .iter()
                .zip(candidate)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

pub type AppState = Arc<ServerState>;

/// Correlation id assigned to each request by the request middleware.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    pub question_id: QuestionId,
    pub random_index: u64,
    pub market_end_timestamp: u64,
    pub price_update_data: Vec<Bytes>,
    /// Wei attached to the call.
    pub value: u128,
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveMarketMessage {
    pub question_id: QuestionId,
    pub price_update_data: Vec<Bytes>,
    pub answer_cid: String,
    pub value: u128,
    pub auth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Info {
    pub success: bool,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub info: Info,
    pub request_id: String,
}

type Reply = (StatusCode, Json<Envelope>);

fn reply(status: StatusCode, success: bool, response: impl Into<String>, request_id: String) -> Reply {
    (
        status,
        Json(Envelope {
            info: Info {
                success,
                response: response.into(),
            },
            request_id,
        }),
    )
}

fn unauthorized(request_id: String) -> Reply {
    warn!(request_id = %request_id, "Rejected request with incorrect token");
    reply(StatusCode::UNAUTHORIZED, false, "Incorrect Token!", request_id)
}

fn malformed(rejection: JsonRejection, request_id: String) -> Reply {
    warn!(request_id = %request_id, error = %rejection, "Rejected malformed payload");
    reply(
        StatusCode::UNPROCESSABLE_ENTITY,
        false,
        rejection.body_text(),
        request_id,
    )
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /initializeMarket
pub async fn initialize_market(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    payload: Result<Json<MarketInfo>, JsonRejection>,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection, request_id),
    };
    if !state.token_matches(&payload.auth_token) {
        return unauthorized(request_id);
    }

    let question_id = hex32(&payload.question_id);
    let call = ContractCall::CreateMarket {
        question_id: payload.question_id,
        random_index: payload.random_index,
        market_end_timestamp: payload.market_end_timestamp,
        price_update_data: payload.price_update_data,
    };

    match state.sequencer.submit(call, U256::from(payload.value)).await {
        TransactionOutcome::Succeeded { hash } => reply(
            StatusCode::OK,
            true,
            format!("tx_hash: {} succeeded!, question_id: {question_id}", hex32(&hash)),
            request_id,
        ),
        TransactionOutcome::Failed { .. } => reply(
            StatusCode::OK,
            false,
            format!("tx failed for question_id: {question_id}"),
            request_id,
        ),
        TransactionOutcome::Errored { cause } => {
            error!(request_id = %request_id, question_id = %question_id, cause = %cause, "Market initialisation errored");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                format!("Failed to initialize: {cause}"),
                request_id,
            )
        }
    }
}

/// POST /resolveMarket
pub async fn resolve_market(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    payload: Result<Json<ResolveMarketMessage>, JsonRejection>,
) -> Reply {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection, request_id),
    };
    if !state.token_matches(&payload.auth_token) {
        return unauthorized(request_id);
    }

    let question_id = hex32(&payload.question_id);
    let call = ContractCall::ResolveMarket {
        question_id: payload.question_id,
        price_update_data: payload.price_update_data,
        answer_cid: payload.answer_cid,
    };

    match state.sequencer.submit(call, U256::from(payload.value)).await {
        TransactionOutcome::Succeeded { hash } => reply(
            StatusCode::OK,
            true,
            format!("tx_hash: {} succeeded!, question_id: {question_id}", hex32(&hash)),
            request_id,
        ),
        TransactionOutcome::Failed { .. } => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            format!("tx failed for question_id: {question_id}"),
            request_id,
        ),
        TransactionOutcome::Errored { cause } => {
            error!(request_id = %request_id, question_id = %question_id, cause = %cause, "Market resolution errored");
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, cause, request_id)
        }
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
