//! Oracle contract calls.
//!
//! Write side: the two payable entry points the operator drives
//! (`createMarket`, `resolveMarket`), ABI-encoded into calldata.
//! Read side: the view calls the expiry monitor polls
//! (`getActiveMarketIds`, `getMarketData`), exposed through the
//! `MarketReader` trait so the monitor never touches raw calldata.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::debug;

use crate::ledger::Ledger;
use crate::types::{hex32, LedgerError, MarketRecord, QuestionId};

pub const CREATE_MARKET: &str = "createMarket";
pub const RESOLVE_MARKET: &str = "resolveMarket";
const GET_ACTIVE_MARKET_IDS: &str = "getActiveMarketIds";
const GET_MARKET_DATA: &str = "getMarketData";

// ---------------------------------------------------------------------------
// Write calls
// ---------------------------------------------------------------------------

/// A state-changing call on the oracle contract.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCall {
    /// `createMarket(bytes32,uint256,uint256,bytes[])`
    CreateMarket {
        question_id: QuestionId,
        random_index: u64,
        market_end_timestamp: u64,
        price_update_data: Vec<Bytes>,
    },
    /// `resolveMarket(bytes32,bytes[],string)`
    ResolveMarket {
        question_id: QuestionId,
        price_update_data: Vec<Bytes>,
        answer_cid: String,
    },
}

impl ContractCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::CreateMarket { .. } => CREATE_MARKET,
            ContractCall::ResolveMarket { .. } => RESOLVE_MARKET,
        }
    }

    pub fn question_id(&self) -> QuestionId {
        match self {
            ContractCall::CreateMarket { question_id, .. }
            | ContractCall::ResolveMarket { question_id, .. } => *question_id,
        }
    }

    /// ABI-encoded calldata: 4-byte selector followed by the arguments.
    pub fn encode(&self) -> Bytes {
        match self {
            ContractCall::CreateMarket {
                question_id,
                random_index,
                market_end_timestamp,
                price_update_data,
            } => encode_call(
                CREATE_MARKET,
                &[
                    ParamType::FixedBytes(32),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Array(Box::new(ParamType::Bytes)),
                ],
                &[
                    Token::FixedBytes(question_id.as_bytes().to_vec()),
                    Token::Uint(U256::from(*random_index)),
                    Token::Uint(U256::from(*market_end_timestamp)),
                    bytes_array(price_update_data),
                ],
            ),
            ContractCall::ResolveMarket {
                question_id,
                price_update_data,
                answer_cid,
            } => encode_call(
                RESOLVE_MARKET,
                &[
                    ParamType::FixedBytes(32),
                    ParamType::Array(Box::new(ParamType::Bytes)),
                    ParamType::String,
                ],
                &[
                    Token::FixedBytes(question_id.as_bytes().to_vec()),
                    bytes_array(price_update_data),
                    Token::String(answer_cid.clone()),
                ],
            ),
        }
    }
}

fn bytes_array(items: &[Bytes]) -> Token {
    Token::Array(items.iter().map(|b| Token::Bytes(b.to_vec())).collect())
}

fn encode_call(name: &str, params: &[ParamType], tokens: &[Token]) -> Bytes {
    let mut data = abi::short_signature(name, params).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

// ---------------------------------------------------------------------------
// Read calls
// ---------------------------------------------------------------------------

/// Calldata for `getActiveMarketIds()`.
pub fn encode_active_market_ids() -> Bytes {
    encode_call(GET_ACTIVE_MARKET_IDS, &[], &[])
}

/// Calldata for `getMarketData(bytes32)`.
pub fn encode_market_data(question_id: QuestionId) -> Bytes {
    encode_call(
        GET_MARKET_DATA,
        &[ParamType::FixedBytes(32)],
        &[Token::FixedBytes(question_id.as_bytes().to_vec())],
    )
}

/// Decode the `bytes32[]` returned by `getActiveMarketIds()`.
/// Zero ids are empty slots and are dropped.
pub fn decode_active_market_ids(data: &[u8]) -> Result<Vec<QuestionId>, LedgerError> {
    let tokens = abi::decode(
        &[ParamType::Array(Box::new(ParamType::FixedBytes(32)))],
        data,
    )
    .map_err(|e| LedgerError::Decode(format!("{GET_ACTIVE_MARKET_IDS}: {e}")))?;

    let ids = tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| LedgerError::Decode(format!("{GET_ACTIVE_MARKET_IDS}: expected array")))?;

    Ok(ids
        .into_iter()
        .filter_map(Token::into_fixed_bytes)
        .filter(|b| b.len() == 32)
        .map(|b| H256::from_slice(&b))
        .filter(|id| !id.is_zero())
        .collect())
}

/// Decode the leading `questionData` words of `getMarketData(bytes32)`:
/// question id, end timestamp, FPMM pool, price feed id. Later fields
/// (prices, outcome) are not needed by the operator and are ignored.
pub fn decode_market_data(
    question_id: QuestionId,
    data: &[u8],
) -> Result<MarketRecord, LedgerError> {
    let tokens = abi::decode(
        &[
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::FixedBytes(32),
        ],
        data,
    )
    .map_err(|e| LedgerError::Decode(format!("{GET_MARKET_DATA}: {e}")))?;

    let mut it = tokens.into_iter();
    let malformed = || LedgerError::Decode(format!("{GET_MARKET_DATA}: malformed questionData"));

    let _stored_id = it.next().and_then(Token::into_fixed_bytes).ok_or_else(malformed)?;
    let end = it.next().and_then(Token::into_uint).ok_or_else(malformed)?;
    let pool = it.next().and_then(Token::into_address).ok_or_else(malformed)?;
    let feed = it.next().and_then(Token::into_fixed_bytes).ok_or_else(malformed)?;

    if end > U256::from(u64::MAX) {
        return Err(LedgerError::Decode(format!(
            "{GET_MARKET_DATA}: end timestamp out of range for {}",
            hex32(&question_id)
        )));
    }

    Ok(MarketRecord {
        question_id,
        end_timestamp: end.as_u64(),
        pool,
        price_feed_id: H256::from_slice(&feed),
        resolved: false,
    })
}

/// Read access to the oracle contract's market registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketReader: Send + Sync {
    /// Ids of all markets the contract currently lists as active.
    async fn active_market_ids(&self) -> Result<Vec<QuestionId>, LedgerError>;

    /// End time, pool and price feed for a single market.
    async fn market_data(&self, question_id: QuestionId) -> Result<MarketRecord, LedgerError>;
}

/// `MarketReader` backed by read-only `eth_call`s through a `Ledger`.
pub struct OracleReader {
    ledger: Arc<dyn Ledger>,
    contract: Address,
}

impl OracleReader {
    pub fn new(ledger: Arc<dyn Ledger>, contract: Address) -> Self {
        Self { ledger, contract }
    }
}

#[async_trait]
impl MarketReader for OracleReader {
    async fn active_market_ids(&self) -> Result<Vec<QuestionId>, LedgerError> {
        let raw = self.ledger.call(self.contract, encode_active_market_ids()).await?;
        let ids = decode_active_market_ids(&raw)?;
        debug!(count = ids.len(), "Fetched active market ids");
        Ok(ids)
    }

    async fn market_data(&self, question_id: QuestionId) -> Result<MarketRecord, LedgerError> {
        let raw = self
            .ledger
            .call(self.contract, encode_market_data(question_id))
            .await?;
        decode_market_data(question_id, &raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
