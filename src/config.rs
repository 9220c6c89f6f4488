//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (signer key, API token) are referenced by env-var name in the
//! config and resolved at startup into `SecretString`s.

use anyhow::{bail, Context, Result};
use ethers::types::{Address, H256, U256};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::creator::CreatorConfig;
use crate::engine::monitor::MonitorConfig;
use crate::engine::sequencer::SequencerConfig;
use crate::ledger::signer::{gwei, GasSettings, DEFAULT_GAS_LIMIT};
use crate::pricefeed::hermes::DEFAULT_HERMES_URL;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub sequencer: SequencerSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub creator: CreatorSection,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub oracle_contract: Address,
    /// Expected signer address; startup fails if the key derives another.
    #[serde(default)]
    pub signer_account: Option<Address>,
    #[serde(default = "default_signer_key_env")]
    pub signer_key_env: String,
}

fn default_chain_id() -> u64 {
    11_155_111
}

fn default_signer_key_env() -> String {
    "OPERATOR_PRIVATE_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GasConfig {
    pub gas_limit: u64,
    pub max_fee_per_gas_gwei: f64,
    pub max_priority_fee_per_gas_gwei: f64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            max_fee_per_gas_gwei: 0.02,
            max_priority_fee_per_gas_gwei: 0.01,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SequencerSection {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub nonce_cooldown_secs: u64,
    pub receipt_poll_ms: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for SequencerSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1,
            backoff_cap_secs: 10,
            nonce_cooldown_secs: 10,
            receipt_poll_ms: 2_000,
            receipt_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorSection {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub resolution_value_wei: u128,
    pub resolve_delay_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            resolution_value_wei: 10_000_000_000,
            resolve_delay_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PriceFeedConfig {
    pub hermes_url: String,
    pub timeout_secs: u64,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            hermes_url: DEFAULT_HERMES_URL.to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CreatorSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub min_end_offset_secs: u64,
    pub max_end_offset_secs: u64,
    pub value_wei: u128,
    /// Pyth feed ids, in the order the contract indexes them.
    pub price_feed_ids: Vec<H256>,
}

impl Default for CreatorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 600,
            min_end_offset_secs: 600,
            max_end_offset_secs: 21_600,
            value_wei: 10_000_000_000,
            price_feed_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: "OPERATOR_AUTH_TOKEN".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.trim().is_empty() {
            bail!("chain.rpc_url must not be empty");
        }
        if self.sequencer.max_attempts == 0 {
            bail!("sequencer.max_attempts must be at least 1");
        }
        if self.sequencer.backoff_cap_secs < self.sequencer.backoff_base_secs {
            bail!(
                "sequencer.backoff_cap_secs ({}) is below backoff_base_secs ({})",
                self.sequencer.backoff_cap_secs,
                self.sequencer.backoff_base_secs
            );
        }
        if self.creator.min_end_offset_secs > self.creator.max_end_offset_secs {
            bail!("creator.min_end_offset_secs exceeds max_end_offset_secs");
        }
        if self.creator.enabled && self.creator.price_feed_ids.is_empty() {
            bail!("creator is enabled but creator.price_feed_ids is empty");
        }
        if self.gas.max_priority_fee_per_gas_gwei > self.gas.max_fee_per_gas_gwei {
            bail!("gas.max_priority_fee_per_gas_gwei exceeds max_fee_per_gas_gwei");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable holding a secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.server.host, self.server.port))
    }

    pub fn gas_settings(&self) -> GasSettings {
        GasSettings {
            gas_limit: self.gas.gas_limit,
            max_fee_per_gas: gwei(self.gas.max_fee_per_gas_gwei),
            max_priority_fee_per_gas: gwei(self.gas.max_priority_fee_per_gas_gwei),
        }
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            max_attempts: self.sequencer.max_attempts,
            backoff_base: Duration::from_secs(self.sequencer.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.sequencer.backoff_cap_secs),
            nonce_cooldown: Duration::from_secs(self.sequencer.nonce_cooldown_secs),
        }
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.sequencer.receipt_poll_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.sequencer.receipt_timeout_secs)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.monitor.check_interval_secs),
            resolution_value: U256::from(self.monitor.resolution_value_wei),
            resolve_delay_secs: self.monitor.resolve_delay_secs,
        }
    }

    pub fn creator_config(&self) -> CreatorConfig {
        CreatorConfig {
            interval: Duration::from_secs(self.creator.interval_secs),
            min_end_offset: Duration::from_secs(self.creator.min_end_offset_secs),
            max_end_offset: Duration::from_secs(self.creator.max_end_offset_secs),
            value: U256::from(self.creator.value_wei),
            price_feed_ids: self.creator.price_feed_ids.clone(),
        }
    }
}
