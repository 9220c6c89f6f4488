//! Periodic market creator.
//!
//! Every interval, picks one of the configured price feeds at random,
//! chooses an end time a random offset into the future, fetches fresh
//! price update data and submits `createMarket` through the sequencer.
//! Disabled unless `[creator] enabled = true`.

use chrono::Utc;
use ethers::types::{H256, U256};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::contract::ContractCall;
use crate::engine::sequencer::Sequencer;
use crate::pricefeed::PriceFeed;
use crate::types::{hex32, PriceFeedError, QuestionId, TransactionOutcome};

#[derive(Debug, Clone)]
pub struct CreatorConfig {
    pub interval: Duration,
    /// Smallest distance between now and a new market's end time.
    pub min_end_offset: Duration,
    pub max_end_offset: Duration,
    /// Wei attached to each `createMarket` call.
    pub value: U256,
    /// Feeds a market can be created on; the contract indexes the same list.
    pub price_feed_ids: Vec<H256>,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            min_end_offset: Duration::from_secs(10 * 60),
            max_end_offset: Duration::from_secs(6 * 60 * 60),
            value: U256::from(10_000_000_000u64),
            price_feed_ids: Vec::new(),
        }
    }
}

/// Parameters of the next market to create.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPlan {
    pub question_id: QuestionId,
    pub random_index: u64,
    pub price_feed_id: H256,
    pub market_end_timestamp: u64,
}

/// Question id derived from the creation time: `sha256("market-{millis}")`.
pub fn question_id_at(unix_millis: i64) -> QuestionId {
    let digest = Sha256::digest(format!("market-{unix_millis}").as_bytes());
    H256::from_slice(&digest)
}

pub struct MarketCreator {
    price_feed: Arc<dyn PriceFeed>,
    sequencer: Arc<Sequencer>,
    config: CreatorConfig,
}

impl MarketCreator {
    pub fn new(
        price_feed: Arc<dyn PriceFeed>,
        sequencer: Arc<Sequencer>,
        config: CreatorConfig,
    ) -> Self {
        Self {
            price_feed,
            sequencer,
            config,
        }
    }

    /// Plan a market created at `unix_millis`. `None` when no feeds are
    /// configured.
    pub fn plan<R: Rng>(&self, unix_millis: i64, rng: &mut R) -> Option<MarketPlan> {
        if self.config.price_feed_ids.is_empty() {
            return None;
        }

        let random_index = rng.gen_range(0..self.config.price_feed_ids.len());
        let min = self.config.min_end_offset.as_secs();
        let max = self.config.max_end_offset.as_secs().max(min);
        let offset = rng.gen_range(min..=max);
        let now_secs = u64::try_from(unix_millis / 1_000).unwrap_or(0);

        Some(MarketPlan {
            question_id: question_id_at(unix_millis),
            random_index: random_index as u64,
            price_feed_id: self.config.price_feed_ids[random_index],
            market_end_timestamp: now_secs + offset,
        })
    }

    /// Create one market now.
    pub async fn create_one(&self) -> Result<TransactionOutcome, PriceFeedError> {
        let plan = {
            let mut rng = rand::thread_rng();
            match self.plan(Utc::now().timestamp_millis(), &mut rng) {
                Some(plan) => plan,
                None => {
                    return Ok(TransactionOutcome::Errored {
                        cause: "no price feeds configured".to_string(),
                    })
                }
            }
        };

        info!(
            question_id = %hex32(&plan.question_id),
            random_index = plan.random_index,
            end_timestamp = plan.market_end_timestamp,
            "Creating market"
        );

        let price_update_data = self.price_feed.fetch_update(plan.price_feed_id).await?;

        let call = ContractCall::CreateMarket {
            question_id: plan.question_id,
            random_index: plan.random_index,
            market_end_timestamp: plan.market_end_timestamp,
            price_update_data,
        };
        Ok(self.sequencer.submit(call, self.config.value).await)
    }

    /// Create a market every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            feeds = self.config.price_feed_ids.len(),
            "Starting market creator"
        );

        while !shutdown.is_cancelled() {
            match self.create_one().await {
                Ok(outcome) if outcome.is_success() => info!(%outcome, "Market created"),
                Ok(outcome) => warn!(%outcome, "Market creation did not succeed"),
                Err(e) => error!(error = %e, "Market creation failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Market creator stopped");
    }
}
