//! Market-expiry monitor.
//!
//! Runs Poll → Diff → Resolve → Sleep forever:
//! 1. Poll the contract for active market ids and each market's metadata.
//!    A market whose metadata read fails is dropped from this cycle only.
//! 2. Diff: a market is a candidate once its end time (plus the configured
//!    delay) has passed and it is not in the resolved set.
//! 3. Resolve candidates one at a time through the shared sequencer.
//!    Only a `Succeeded` outcome marks a market resolved; anything else is
//!    retried on the next cycle.
//! 4. Sleep for the check interval, waking early on shutdown.
//!
//! The resolved set lives in memory only and is rebuilt empty on restart.

use chrono::Utc;
use ethers::types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contract::{ContractCall, MarketReader};
use crate::engine::sequencer::Sequencer;
use crate::pricefeed::PriceFeed;
use crate::types::{hex32, LedgerError, MarketRecord, QuestionId, TransactionOutcome};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    /// Wei attached to each `resolveMarket` call (covers the price update fee).
    pub resolution_value: U256,
    /// Extra seconds past the end timestamp before a market is resolved.
    pub resolve_delay_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            resolution_value: U256::from(10_000_000_000u64),
            resolve_delay_secs: 0,
        }
    }
}

/// Summary of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Markets with readable metadata this cycle.
    pub tracked: usize,
    /// Markets whose metadata read failed.
    pub unreadable: usize,
    pub candidates: usize,
    pub resolved: usize,
    /// Resolution submitted but did not succeed.
    pub failed: usize,
    /// No price update available; left for the next cycle.
    pub skipped: usize,
}

enum Resolution {
    Resolved,
    Failed,
    Skipped,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct MarketMonitor {
    reader: Arc<dyn MarketReader>,
    price_feed: Arc<dyn PriceFeed>,
    sequencer: Arc<Sequencer>,
    config: MonitorConfig,
    markets: HashMap<QuestionId, MarketRecord>,
    resolved: HashSet<QuestionId>,
}

impl MarketMonitor {
    pub fn new(
        reader: Arc<dyn MarketReader>,
        price_feed: Arc<dyn PriceFeed>,
        sequencer: Arc<Sequencer>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            reader,
            price_feed,
            sequencer,
            config,
            markets: HashMap::new(),
            resolved: HashSet::new(),
        }
    }

    /// Markets seen on the most recent poll.
    pub fn tracked_markets(&self) -> &HashMap<QuestionId, MarketRecord> {
        &self.markets
    }

    /// Markets resolved by this process.
    pub fn resolved_markets(&self) -> &HashSet<QuestionId> {
        &self.resolved
    }

    /// Run until `shutdown` is cancelled. A failing cycle is logged and
    /// treated as a cycle with no candidates.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Starting market monitor"
        );

        while !shutdown.is_cancelled() {
            match self.run_cycle(unix_now()).await {
                Ok(report) => log_cycle_report(&report),
                Err(e) => error!(error = %e, "Monitor cycle failed, continuing"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }

        info!(resolved = self.resolved.len(), "Market monitor stopped");
    }

    /// One Poll → Diff → Resolve pass evaluated at unix time `now`.
    pub async fn run_cycle(&mut self, now: u64) -> Result<CycleReport, LedgerError> {
        let mut report = CycleReport::default();

        self.poll(now, &mut report).await?;

        let candidates = self.candidates(now);
        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!("No expired markets found");
            return Ok(report);
        }
        info!(count = candidates.len(), "Found expired markets");

        for market in candidates {
            match self.resolve(&market, now).await {
                Resolution::Resolved => report.resolved += 1,
                Resolution::Failed => report.failed += 1,
                Resolution::Skipped => report.skipped += 1,
            }
        }

        Ok(report)
    }

    /// Replace the market cache with a fresh view of the contract.
    async fn poll(&mut self, now: u64, report: &mut CycleReport) -> Result<(), LedgerError> {
        let ids = self.reader.active_market_ids().await?;
        debug!(count = ids.len(), "Active market ids");

        let mut fresh = HashMap::with_capacity(ids.len());
        for id in ids {
            match self.reader.market_data(id).await {
                Ok(mut market) => {
                    market.resolved = self.resolved.contains(&id);
                    let status = if market.is_due(now, 0) { "EXPIRED" } else { "ACTIVE" };
                    debug!(
                        question_id = %hex32(&id),
                        status,
                        ends_in_secs = market.seconds_remaining(now),
                        "Market status"
                    );
                    fresh.insert(id, market);
                }
                Err(e) => {
                    warn!(question_id = %hex32(&id), error = %e, "Failed to read market data");
                    report.unreadable += 1;
                }
            }
        }

        self.markets = fresh;
        report.tracked = self.markets.len();
        Ok(())
    }

    /// Due, unresolved markets ordered by end time.
    fn candidates(&self, now: u64) -> Vec<MarketRecord> {
        let mut due: Vec<MarketRecord> = self
            .markets
            .values()
            .filter(|m| !self.resolved.contains(&m.question_id))
            .filter(|m| m.is_due(now, self.config.resolve_delay_secs))
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.end_timestamp, m.question_id));
        due
    }

    async fn resolve(&mut self, market: &MarketRecord, now: u64) -> Resolution {
        let id = market.question_id;
        info!(question_id = %hex32(&id), "Attempting to resolve expired market");

        let price_update_data = match self.price_feed.fetch_update(market.price_feed_id).await {
            Ok(update) if !update.is_empty() => update,
            Ok(_) => {
                warn!(question_id = %hex32(&id), "Empty price update, skipping this cycle");
                return Resolution::Skipped;
            }
            Err(e) => {
                warn!(question_id = %hex32(&id), error = %e, "Price update unavailable, skipping this cycle");
                return Resolution::Skipped;
            }
        };

        let call = ContractCall::ResolveMarket {
            question_id: id,
            price_update_data,
            answer_cid: format!("resolved-{now}"),
        };

        match self.sequencer.submit(call, self.config.resolution_value).await {
            TransactionOutcome::Succeeded { hash } => {
                self.resolved.insert(id);
                if let Some(m) = self.markets.get_mut(&id) {
                    m.resolved = true;
                }
                info!(question_id = %hex32(&id), tx_hash = %hex32(&hash), "Market resolved");
                Resolution::Resolved
            }
            outcome => {
                warn!(question_id = %hex32(&id), %outcome, "Resolution did not succeed, will retry");
                Resolution::Failed
            }
        }
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn log_cycle_report(report: &CycleReport) {
    info!(
        tracked = report.tracked,
        unreadable = report.unreadable,
        candidates = report.candidates,
        resolved = report.resolved,
        failed = report.failed,
        skipped = report.skipped,
        "Monitor cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
