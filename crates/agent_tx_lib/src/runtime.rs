use crate::config::{Config, LimitsSettings};
use crate::db::create_sqlite_connection;
use crate::error::{CustomError, ErrorBag, ExecutorError};
use crate::err_custom_create;
use crate::events::EventBus;
use crate::mev::MevRelay;
use crate::model::UserLimits;
use crate::nonce::NonceManager;
use crate::price::StaticPriceFeed;
use crate::process::{ExecutorContext, StaticApproval};
use crate::retry::RetryPolicy;
use crate::risk::RiskEngine;
use crate::service::service_loop;
use crate::setup::ExecutorSetup;
use crate::signer::TransactionSigner;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Session counters kept by the service loop, read by the status API.
#[derive(Debug, Default)]
pub struct SharedState {
    pub inserted: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub idling: bool,
}

pub struct RuntimeOptions {
    /// Keep the loop alive after the queue drains. One-shot commands set
    /// this to false so the process can exit.
    pub keep_running: bool,
    /// Overrides the DB_SQLITE_FILENAME environment variable.
    pub db_filename: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            keep_running: true,
            db_filename: None,
        }
    }
}

pub struct ExecutorRuntime {
    pub runtime_handle: JoinHandle<()>,
    pub setup: ExecutorSetup,
    pub shared_state: Arc<Mutex<SharedState>>,
    pub conn: Arc<Mutex<SqliteConnection>>,
    pub event_bus: EventBus,
}

fn limits_from_config(limits: &LimitsSettings) -> Result<UserLimits, ExecutorError> {
    let max_per_tx_usd = Decimal::from_f64(limits.max_per_tx_usd)
        .ok_or_else(|| err_custom_create!("Invalid max-per-tx-usd: {}", limits.max_per_tx_usd))?;
    let max_daily_usd = Decimal::from_f64(limits.max_daily_usd)
        .ok_or_else(|| err_custom_create!("Invalid max-daily-usd: {}", limits.max_daily_usd))?;
    Ok(UserLimits {
        max_per_tx_usd,
        max_daily_usd,
        cooldown_seconds: limits.cooldown_seconds,
        max_slippage_bps: limits.max_slippage_bps,
    })
}

/// Wire the pipeline collaborators from the config file. The retry
/// policy from the risk section also covers fee reads and relay posts.
pub fn build_context(
    config: &Config,
    signer: Arc<dyn TransactionSigner>,
) -> Result<ExecutorContext, ExecutorError> {
    let retry = RetryPolicy::new(config.risk.retry_max_attempts, config.risk.retry_backoff_ms);
    let mev_relay = if config.chain.values().any(|c| c.mev_relay_url.is_some()) {
        Some(MevRelay::new(
            Duration::from_secs(config.engine.broadcast_timeout),
            retry.clone(),
        )?)
    } else {
        None
    };
    let block_on_unknown = match config.risk.unknown_verdict.to_lowercase().as_str() {
        "block" => true,
        "warn" => false,
        other => {
            return Err(err_custom_create!(
                "Unknown risk verdict policy: {}, expected block or warn",
                other
            ))
        }
    };
    Ok(ExecutorContext {
        risk_engine: RiskEngine::new(&config.risk)?,
        nonce_manager: NonceManager::default(),
        signer,
        mev_relay,
        price_feed: Arc::new(StaticPriceFeed::from_config(config)),
        event_bus: EventBus::default(),
        approval: Arc::new(StaticApproval {
            approve: config.risk.approve_on_warn,
        }),
        default_limits: limits_from_config(&config.limits)?,
        block_on_unknown,
        fee_retry: retry,
    })
}

pub async fn start_executor_engine(
    options: Option<RuntimeOptions>,
    signer: Arc<dyn TransactionSigner>,
    config: Config,
) -> Result<ExecutorRuntime, ExecutorError> {
    let options = options.unwrap_or_default();
    let setup = ExecutorSetup::new(&config, !options.keep_running)?;
    log::debug!("Starting executor engine: {:#?}", setup);

    let db_filename = match options.db_filename {
        Some(name) => name,
        None => env::var("DB_SQLITE_FILENAME").map_err(|_| {
            err_custom_create!("DB_SQLITE_FILENAME environment variable not set")
        })?,
    };
    log::info!("Connecting to sqlite db: {}", db_filename);
    let mut conn = create_sqlite_connection(Some(&db_filename), true).await?;
    let conn2 = create_sqlite_connection(Some(&db_filename), false).await?;

    let ctx = build_context(&config, signer)?;
    let event_bus = ctx.event_bus.clone();

    let shared_state = Arc::new(Mutex::new(SharedState::default()));
    let shared_state_clone = shared_state.clone();
    let ps = setup.clone();
    let jh =
        tokio::spawn(async move { service_loop(shared_state_clone, &mut conn, &ps, &ctx).await });

    Ok(ExecutorRuntime {
        runtime_handle: jh,
        setup,
        shared_state,
        conn: Arc::new(Mutex::new(conn2)),
        event_bus,
    })
}
