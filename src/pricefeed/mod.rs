//! Price-feed update data.
//!
//! Market creation and resolution both carry a signed price update blob
//! that the contract verifies on-chain. `PriceFeed` fetches those blobs;
//! `hermes` implements it against the Pyth Hermes REST API.

pub mod hermes;

use async_trait::async_trait;
use ethers::types::{Bytes, H256};

use crate::types::PriceFeedError;

/// Source of price update blobs for a feed id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest update data for `feed_id`, one entry per signed message.
    async fn fetch_update(&self, feed_id: H256) -> Result<Vec<Bytes>, PriceFeedError>;
}

pub use hermes::HermesClient;
