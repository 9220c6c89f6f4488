//! Pyth Hermes client.
//!
//! API: `GET {base}/api/latest_vaas?ids[]=<feed id>`
//! Auth: None required.
//! Response: JSON array of base64-encoded VAAs, passed to the contract
//! as `bytes[]` price update data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ethers::types::{Bytes, H256};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::PriceFeed;
use crate::types::{hex32, PriceFeedError};

pub const DEFAULT_HERMES_URL: &str = "https://hermes.pyth.network";

pub struct HermesClient {
    http: Client,
    base_url: String,
}

impl HermesClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("oracle-operator/0.1.0")
            .build()
            .context("Failed to build Hermes HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn latest_vaas_url(&self) -> String {
        format!("{}/api/latest_vaas", self.base_url)
    }

    /// Decode the base64 VAA list returned by Hermes.
    pub fn decode_vaas(encoded: &[String]) -> Result<Vec<Bytes>, PriceFeedError> {
        encoded
            .iter()
            .map(|vaa| {
                STANDARD
                    .decode(vaa.trim())
                    .map(Bytes::from)
                    .map_err(|e| PriceFeedError::Decode(format!("invalid base64 VAA: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl PriceFeed for HermesClient {
    async fn fetch_update(&self, feed_id: H256) -> Result<Vec<Bytes>, PriceFeedError> {
        let feed = hex32(&feed_id);
        debug!(feed_id = %feed, "Fetching Pyth update data");

        let resp = self
            .http
            .get(self.latest_vaas_url())
            .query(&[("ids[]", feed.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PriceFeedError::Status { status, body });
        }

        let encoded: Vec<String> = resp
            .json()
            .await
            .map_err(|e| PriceFeedError::Decode(e.to_string()))?;
        let update = Self::decode_vaas(&encoded)?;

        info!(feed_id = %feed, messages = update.len(), "Pyth update data retrieved");
        Ok(update)
    }
}
