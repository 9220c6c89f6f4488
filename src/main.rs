//! Oracle operator entry point.
//!
//! Loads configuration, initialises structured logging, connects the
//! sequencer to the chain (fatal if the nonce cannot be read), spawns the
//! expiry monitor and market creator, and serves the operator API until
//! Ctrl+C.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use oracle_operator::config::AppConfig;
use oracle_operator::contract::OracleReader;
use oracle_operator::engine::creator::MarketCreator;
use oracle_operator::engine::monitor::MarketMonitor;
use oracle_operator::engine::sequencer::Sequencer;
use oracle_operator::ledger::{Ledger, LocalSigner, RpcLedger, TransactionSigner};
use oracle_operator::pricefeed::{HermesClient, PriceFeed};
use oracle_operator::server::{self, routes::ServerState};

const BANNER: &str = r#"
  ___  ____      _    ____ _     _____
 / _ \|  _ \    / \  / ___| |   | ____|
| | | | |_) |  / _ \| |   | |   |  _|
| |_| |  _ <  / ___ \ |___| |___| |___
 \___/|_| \_\/_/   \_\____|_____|_____|

  Market operator: sequencer, expiry monitor, API
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("OPERATOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        chain_id = cfg.chain.chain_id,
        contract = ?cfg.chain.oracle_contract,
        monitor = cfg.monitor.enabled,
        creator = cfg.creator.enabled,
        "Oracle operator starting up"
    );

    // -- Chain access ----------------------------------------------------

    let ledger: Arc<dyn Ledger> = Arc::new(
        RpcLedger::new(&cfg.chain.rpc_url)?
            .with_receipt_polling(cfg.receipt_poll(), cfg.receipt_timeout()),
    );

    let private_key = AppConfig::resolve_secret(&cfg.chain.signer_key_env)?;
    let local_signer = LocalSigner::new(
        &private_key,
        cfg.chain.chain_id,
        cfg.chain.oracle_contract,
        cfg.gas_settings(),
    )?;
    if let Some(expected) = cfg.chain.signer_account {
        if local_signer.address() != expected {
            bail!(
                "Signer key derives {:?}, config expects {:?}",
                local_signer.address(),
                expected
            );
        }
    }
    let signer: Arc<dyn TransactionSigner> = Arc::new(local_signer);

    let sequencer = Arc::new(
        Sequencer::connect(ledger.clone(), signer, cfg.sequencer_config())
            .await
            .context("Failed to read the operator account nonce")?,
    );

    let price_feed: Arc<dyn PriceFeed> = Arc::new(HermesClient::new(
        &cfg.price_feed.hermes_url,
        std::time::Duration::from_secs(cfg.price_feed.timeout_secs),
    )?);

    // -- Background tasks ------------------------------------------------

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if cfg.monitor.enabled {
        let reader = Arc::new(OracleReader::new(ledger.clone(), cfg.chain.oracle_contract));
        let monitor = MarketMonitor::new(
            reader,
            price_feed.clone(),
            sequencer.clone(),
            cfg.monitor_config(),
        );
        tasks.push(tokio::spawn(monitor.run(shutdown.clone())));
    } else {
        warn!("Market monitor disabled");
    }

    if cfg.creator.enabled {
        let creator = MarketCreator::new(price_feed.clone(), sequencer.clone(), cfg.creator_config());
        tasks.push(tokio::spawn(creator.run(shutdown.clone())));
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received."),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
            shutdown.cancel();
        });
    }

    // -- API -------------------------------------------------------------

    let auth_token = AppConfig::resolve_secret(&cfg.auth.token_env)?;
    let state = Arc::new(ServerState::new(sequencer.clone(), auth_token));
    let served = server::serve(state, cfg.listen_addr()?, shutdown.clone()).await;

    // The API only returns early on error; stop the background tasks too.
    shutdown.cancel();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Background task panicked");
        }
    }

    info!(next_nonce = sequencer.current_nonce().await, "Oracle operator shut down cleanly.");
    served
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oracle_operator=info,tower_http=info"));

    let json_logging = std::env::var("OPERATOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
