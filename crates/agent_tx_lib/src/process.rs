use crate::db::model::TxDao;
use crate::db::ops::{
    get_effective_limits, insert_guardrail_checks, insert_sim_result, insert_status_event,
    update_tx,
};
use crate::error::{CustomError, ErrorBag, ExecutorError};
use crate::events::{EventBus, StatusUpdate};
use crate::gas::estimate_fee;
use crate::guardrails::evaluate_guardrails;
use crate::mev::MevRelay;
use crate::model::{
    all_checks_passed, ContractRiskReport, GasFeeEstimate, RiskClassification, RiskSeverity,
    SimulationResult, TxStatus, UserLimits,
};
use crate::nonce::{rejection_proves_not_pooled, NonceManager};
use crate::price::PriceFeed;
use crate::retry::RetryPolicy;
use crate::risk::RiskEngine;
use crate::setup::{ChainSetup, ExecutorSetup};
use crate::signer::{sign_tx_dao, TransactionSigner};
use crate::simulate::{load_simulation, simulate_transaction};
use crate::transaction::find_receipt;
use crate::{err_custom_create, err_from};
use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use web3::transports::Http;
use web3::types::{Address, Bytes, U256};
use web3::Web3;

/// Added on top of the simulated gas estimate when the caller did not
/// pin a gas limit.
const GAS_SAFETY_MARGIN: u64 = 20000;

#[derive(Debug)]
pub enum ProcessTransactionResult {
    Confirmed,
    /// Stopped by policy, never retried.
    Rejected(String),
    /// Transient trouble, the row stays in its current status and the
    /// service loop will pick it up again.
    NeedRetry(String),
    /// Ended in failed status.
    InternalError(String),
    /// Broadcast but not seen on chain within the polling budget.
    Unresolved,
}

/// Consulted when risk data comes back as a warning. Gives the caller
/// the last word before funds move.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn approve_on_warn(&self, tx: &TxDao, report: &ContractRiskReport) -> bool;
}

/// Fixed decision taken from configuration.
pub struct StaticApproval {
    pub approve: bool,
}

#[async_trait]
impl ApprovalCallback for StaticApproval {
    async fn approve_on_warn(&self, _tx: &TxDao, _report: &ContractRiskReport) -> bool {
        self.approve
    }
}

/// Long lived collaborators of the pipeline, shared by every processing
/// task. The database connection and chain setup travel separately.
pub struct ExecutorContext {
    pub risk_engine: RiskEngine,
    pub nonce_manager: NonceManager,
    pub signer: Arc<dyn TransactionSigner>,
    pub mev_relay: Option<MevRelay>,
    pub price_feed: Arc<dyn PriceFeed>,
    pub event_bus: EventBus,
    pub approval: Arc<dyn ApprovalCallback>,
    pub default_limits: UserLimits,
    pub block_on_unknown: bool,
    pub fee_retry: RetryPolicy,
}

impl std::fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("default_limits", &self.default_limits)
            .field("block_on_unknown", &self.block_on_unknown)
            .field("fee_retry", &self.fee_retry)
            .finish_non_exhaustive()
    }
}

/// Persists a status change and only then lets the pipeline continue.
/// History row and event fan-out ride along with every transition.
pub async fn advance_status(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    ctx: &ExecutorContext,
    next: TxStatus,
    note: Option<&str>,
) -> Result<(), ExecutorError> {
    let prev = tx.status;
    if !prev.can_transition_to(next) {
        return Err(err_custom_create!(
            "Transition {:?} -> {:?} not allowed for tx {}",
            prev,
            next,
            tx.id
        ));
    }
    tx.status = next;
    update_tx(conn, tx).await.map_err(err_from!())?;
    insert_status_event(conn, tx.id, Some(prev), next, note)
        .await
        .map_err(err_from!())?;
    ctx.event_bus.emit(StatusUpdate::for_tx(tx, Some(prev), next));
    Ok(())
}

fn risk_summary(report: &ContractRiskReport, min_severity: RiskSeverity) -> String {
    let parts: Vec<String> = report
        .dimensions
        .iter()
        .filter(|d| d.severity >= min_severity)
        .map(|d| match &d.detail {
            Some(detail) => format!("{} ({})", d.name, detail),
            None => d.name.clone(),
        })
        .collect();
    if parts.is_empty() {
        "no details provided".to_string()
    } else {
        parts.join(", ")
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastRejection {
    /// The pool already holds this exact transaction, treat as sent.
    AlreadyPooled,
    /// The node proved the transaction never entered any pool.
    NeverPooled,
    /// Rejected for a reason that leaves the pool state uncertain.
    Uncertain,
}

pub fn classify_broadcast_rejection(err_msg: &str) -> BroadcastRejection {
    if err_msg.to_lowercase().contains("already known") {
        BroadcastRejection::AlreadyPooled
    } else if rejection_proves_not_pooled(err_msg) {
        BroadcastRejection::NeverPooled
    } else {
        BroadcastRejection::Uncertain
    }
}

/// Drives one transaction through the pipeline as far as it can go in a
/// single call. Stages are keyed off the persisted status, so a restart
/// resumes exactly where the last run left off.
pub async fn process_transaction(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    setup: &ExecutorSetup,
    ctx: &ExecutorContext,
    wait_for_confirmation: bool,
) -> Result<ProcessTransactionResult, ExecutorError> {
    let chain_setup = setup.get_chain_setup(tx.chain_id)?;
    let web3 = setup.get_provider(tx.chain_id)?;

    if tx.first_processed.is_none() {
        tx.first_processed = Some(chrono::Utc::now());
        update_tx(conn, tx).await.map_err(err_from!())?;
    }

    let mut fresh_sim: Option<SimulationResult> = None;

    loop {
        match tx.status {
            TxStatus::Pending => {
                fresh_sim =
                    Some(simulate_stage(conn, tx, ctx, web3, setup.simulation_timeout).await?);
            }
            TxStatus::Simulated => {
                let sim = match fresh_sim.take() {
                    Some(sim) => sim,
                    None => load_simulation(conn, tx.id).await?.unwrap_or_else(|| {
                        SimulationResult::failed("Simulation result missing from transaction log")
                    }),
                };
                if let Some(reason) = policy_stage(conn, tx, ctx, chain_setup, &sim).await? {
                    tx.error = Some(reason.clone());
                    advance_status(conn, tx, ctx, TxStatus::Rejected, Some(&reason)).await?;
                    log::info!("Transaction {} rejected: {}", tx.id, reason);
                    return Ok(ProcessTransactionResult::Rejected(reason));
                }
            }
            TxStatus::Approved => {
                if let Err(sign_error) = prepare_and_sign_stage(conn, tx, ctx, chain_setup, web3).await? {
                    tx.error = Some(sign_error.clone());
                    advance_status(conn, tx, ctx, TxStatus::Failed, Some(&sign_error)).await?;
                    return Ok(ProcessTransactionResult::InternalError(sign_error));
                }
            }
            TxStatus::Signed => {
                if let Err(broadcast_error) = broadcast_stage(conn, tx, ctx, chain_setup, web3).await? {
                    tx.error = Some(broadcast_error.clone());
                    advance_status(conn, tx, ctx, TxStatus::Failed, Some(&broadcast_error)).await?;
                    return Ok(ProcessTransactionResult::InternalError(broadcast_error));
                }
            }
            TxStatus::Broadcast => {
                return confirm_stage(conn, tx, setup, ctx, chain_setup, web3, wait_for_confirmation)
                    .await;
            }
            TxStatus::Confirmed => {
                return Ok(ProcessTransactionResult::Confirmed);
            }
            TxStatus::Rejected => {
                return Ok(ProcessTransactionResult::Rejected(
                    tx.error.clone().unwrap_or_default(),
                ));
            }
            TxStatus::Failed => {
                return Ok(ProcessTransactionResult::InternalError(
                    tx.error.clone().unwrap_or_default(),
                ));
            }
        }
    }
}

/// Dry-run against the node and persist the outcome. A predicted revert
/// still moves the row forward, the policy stage turns it into a
/// rejection with the provider message attached.
async fn simulate_stage(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    ctx: &ExecutorContext,
    web3: &Web3<Http>,
    timeout_secs: u64,
) -> Result<SimulationResult, ExecutorError> {
    log::info!("Simulating transaction {}", tx.id);
    let sim = simulate_transaction(web3, tx, timeout_secs).await?;
    insert_sim_result(conn, tx.id, &sim).await.map_err(err_from!())?;

    if tx.gas_limit.is_none() {
        if let Some(gas_est) = sim.gas_estimated {
            let gas_limit = gas_est + U256::from(GAS_SAFETY_MARGIN);
            tx.gas_limit = Some(gas_limit.as_u64() as i64);
        }
    }
    let note = if sim.success {
        None
    } else {
        sim.error.as_deref()
    };
    advance_status(conn, tx, ctx, TxStatus::Simulated, note).await?;
    Ok(sim)
}

/// Guardrails and risk data together decide whether the transaction may
/// move funds. Returns the rejection reason, or None when approved.
async fn policy_stage(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    ctx: &ExecutorContext,
    chain_setup: &ChainSetup,
    sim: &SimulationResult,
) -> Result<Option<String>, ExecutorError> {
    let limits = get_effective_limits(conn, &tx.user_id, &ctx.default_limits)
        .await
        .map_err(err_from!())?;
    let checks = evaluate_guardrails(
        conn,
        chain_setup,
        ctx.price_feed.as_ref(),
        tx,
        &limits,
        sim,
    )
    .await?;
    insert_guardrail_checks(conn, tx.id, &checks)
        .await
        .map_err(err_from!())?;

    // Risk lookup runs even when guardrails already failed, the report
    // lands in the log either way.
    let report = ctx.risk_engine.assess(conn, tx.chain_id, &tx.to_addr).await?;

    if !all_checks_passed(&checks) {
        let failing: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.rule, c.message))
            .collect();
        return Ok(Some(format!("Guardrails failed: {}", failing.join("; "))));
    }

    let effective = match report.classification {
        RiskClassification::Unknown if ctx.block_on_unknown => {
            return Ok(Some(format!(
                "Risk data unavailable for contract {} and policy blocks unknown contracts",
                report.address
            )));
        }
        RiskClassification::Unknown => RiskClassification::Warn,
        other => other,
    };

    match effective {
        RiskClassification::Allow => {
            advance_status(conn, tx, ctx, TxStatus::Approved, None).await?;
            Ok(None)
        }
        RiskClassification::Warn => {
            if ctx.approval.approve_on_warn(tx, &report).await {
                let note = format!(
                    "Risk warning accepted by caller: {}",
                    risk_summary(&report, RiskSeverity::Warn)
                );
                advance_status(conn, tx, ctx, TxStatus::Approved, Some(&note)).await?;
                Ok(None)
            } else {
                Ok(Some(format!(
                    "Risk warning declined: {}",
                    risk_summary(&report, RiskSeverity::Warn)
                )))
            }
        }
        RiskClassification::Block | RiskClassification::Unknown => Ok(Some(format!(
            "Risk policy blocked contract {}: {}",
            report.address,
            risk_summary(&report, RiskSeverity::Block)
        ))),
    }
}

/// Reserves a nonce, resolves the fee bid and signs. A signer failure is
/// reported in the inner Err and hands the nonce straight back, technical
/// trouble before signing leaves the row approved for a later retry.
async fn prepare_and_sign_stage(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    ctx: &ExecutorContext,
    chain_setup: &ChainSetup,
    web3: &Web3<Http>,
) -> Result<Result<(), String>, ExecutorError> {
    let from_addr = Address::from_str(&tx.from_addr).map_err(err_from!())?;
    let reserved_nonce = ctx
        .nonce_manager
        .reserve(web3, from_addr, tx.chain_id)
        .await?;
    tx.nonce = Some(reserved_nonce as i64);

    let max_fee_cap = tx
        .max_fee_cap
        .as_ref()
        .map(|c| U256::from_dec_str(c))
        .transpose()
        .map_err(err_from!())?;
    let priority_fee_cap = tx
        .priority_fee_cap
        .as_ref()
        .map(|c| U256::from_dec_str(c))
        .transpose()
        .map_err(err_from!())?;

    let fee = ctx
        .fee_retry
        .call(|| {
            estimate_fee(
                web3,
                chain_setup,
                tx.gas_strategy,
                max_fee_cap,
                priority_fee_cap,
            )
        })
        .await;
    let fee = match fee {
        Ok(fee) => fee,
        Err(err) => {
            ctx.nonce_manager
                .release(from_addr, tx.chain_id, reserved_nonce)
                .await;
            return Err(err);
        }
    };
    match fee {
        GasFeeEstimate::Eip1559 {
            max_fee_per_gas,
            priority_fee,
        } => {
            tx.max_fee_per_gas = Some(max_fee_per_gas.to_string());
            tx.priority_fee = Some(priority_fee.to_string());
        }
        GasFeeEstimate::Legacy { gas_price } => {
            tx.max_fee_per_gas = Some(gas_price.to_string());
            tx.priority_fee = Some(gas_price.to_string());
        }
    }

    match sign_tx_dao(web3, tx, ctx.signer.as_ref(), chain_setup.legacy_gas).await {
        Ok(()) => {
            advance_status(conn, tx, ctx, TxStatus::Signed, None).await?;
            log::info!(
                "Transaction {} signed with nonce {}",
                tx.id,
                reserved_nonce
            );
            Ok(Ok(()))
        }
        Err(err) => {
            ctx.nonce_manager
                .release(from_addr, tx.chain_id, reserved_nonce)
                .await;
            Ok(Err(format!("Signing failed: {}", err)))
        }
    }
}

/// Hands the signed payload to the network, through the protected relay
/// when requested and available, otherwise to the public pool. The inner
/// Err carries rejections that end the transaction.
async fn broadcast_stage(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    ctx: &ExecutorContext,
    chain_setup: &ChainSetup,
    web3: &Web3<Http>,
) -> Result<Result<(), String>, ExecutorError> {
    let signed_raw_data = tx
        .signed_raw_data
        .as_ref()
        .ok_or_else(|| err_custom_create!("No signed raw data for tx {}", tx.id))?;
    let raw = hex::decode(signed_raw_data)
        .map_err(|_| err_custom_create!("Cannot decode signed raw data for tx {}", tx.id))?;
    let from_addr = Address::from_str(&tx.from_addr).map_err(err_from!())?;

    if tx.use_mev_protection && MevRelay::is_supported(chain_setup) {
        if let (Some(relay), Some(relay_url)) = (&ctx.mev_relay, &chain_setup.mev_relay_url) {
            if let Some(relay_hash) = relay.send_protected(relay_url, &raw).await {
                // The relay's answer is authoritative for the hash we poll on.
                tx.tx_hash = Some(format!("{:#x}", relay_hash));
                tx.mev_relay_used = true;
                tx.broadcast_date = Some(chrono::Utc::now());
                tx.broadcast_count += 1;
                advance_status(
                    conn,
                    tx,
                    ctx,
                    TxStatus::Broadcast,
                    Some("sent through protected relay"),
                )
                .await?;
                return Ok(Ok(()));
            }
            log::warn!(
                "Relay unavailable, falling back to public broadcast for tx {}",
                tx.id
            );
        }
    }

    log::info!(
        "Broadcasting transaction {} with nonce {}",
        tx.id,
        tx.nonce.unwrap_or(-1)
    );
    match web3.eth().send_raw_transaction(Bytes(raw)).await {
        Ok(_hash) => {
            tx.broadcast_date = Some(chrono::Utc::now());
            tx.broadcast_count += 1;
            advance_status(conn, tx, ctx, TxStatus::Broadcast, None).await?;
            Ok(Ok(()))
        }
        Err(web3::Error::Rpc(rpc_err)) => match classify_broadcast_rejection(&rpc_err.message) {
            BroadcastRejection::AlreadyPooled => {
                tx.broadcast_date = tx.broadcast_date.or_else(|| Some(chrono::Utc::now()));
                tx.broadcast_count += 1;
                advance_status(conn, tx, ctx, TxStatus::Broadcast, Some("already in pool")).await?;
                Ok(Ok(()))
            }
            BroadcastRejection::NeverPooled => {
                if let Some(nonce) = tx.nonce {
                    ctx.nonce_manager
                        .release(from_addr, tx.chain_id, nonce as u64)
                        .await;
                }
                Ok(Err(format!("Broadcast rejected: {}", rpc_err.message)))
            }
            BroadcastRejection::Uncertain => {
                // Pool state unclear, drop the cached nonce so the next
                // reservation re-reads it from the chain.
                ctx.nonce_manager.resync(from_addr, tx.chain_id).await;
                Ok(Err(format!("Broadcast rejected: {}", rpc_err.message)))
            }
        },
        Err(err) => {
            // The payload may have reached the pool before the transport
            // gave up, keep the row broadcast and let polling decide.
            log::warn!("Broadcast outcome unknown for tx {}: {}", tx.id, err);
            tx.broadcast_date = Some(chrono::Utc::now());
            tx.broadcast_count += 1;
            advance_status(
                conn,
                tx,
                ctx,
                TxStatus::Broadcast,
                Some("broadcast outcome unknown"),
            )
            .await?;
            Ok(Ok(()))
        }
    }
}

/// Polls for the receipt within the configured budget. Exhausting the
/// budget leaves the row broadcast so a later pass or an operator can
/// settle it, nothing here invents a terminal outcome.
#[allow(clippy::too_many_arguments)]
async fn confirm_stage(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    setup: &ExecutorSetup,
    ctx: &ExecutorContext,
    chain_setup: &ChainSetup,
    web3: &Web3<Http>,
    wait_for_confirmation: bool,
) -> Result<ProcessTransactionResult, ExecutorError> {
    let poll_interval = Duration::from_secs(setup.confirmation_poll_interval);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match find_receipt(web3, tx).await {
            Ok(Some(true)) => {
                let current_block = web3
                    .eth()
                    .block_number()
                    .await
                    .map_err(err_from!())?
                    .as_u64();
                let block_number = tx.block_number.ok_or_else(|| {
                    err_custom_create!("Block number missing after receipt for tx {}", tx.id)
                })? as u64;
                if block_number + chain_setup.confirmation_blocks <= current_block {
                    tx.confirm_date = Some(chrono::Utc::now());
                    advance_status(conn, tx, ctx, TxStatus::Confirmed, None).await?;
                    log::info!(
                        "Transaction {} confirmed in block {}, tx hash: {}",
                        tx.id,
                        block_number,
                        tx.tx_hash.clone().unwrap_or_default()
                    );
                    return Ok(ProcessTransactionResult::Confirmed);
                }
                log::info!(
                    "Waiting for confirmations: tx {} in block {}, current block {}, need {}",
                    tx.id,
                    block_number,
                    current_block,
                    block_number + chain_setup.confirmation_blocks
                );
            }
            Ok(Some(false)) => {
                // The nonce is consumed on chain, nothing to release.
                let reason = "Transaction reverted on chain".to_string();
                tx.error = Some(reason.clone());
                advance_status(conn, tx, ctx, TxStatus::Failed, Some(&reason)).await?;
                return Ok(ProcessTransactionResult::InternalError(reason));
            }
            Ok(None) => {
                log::debug!("Receipt not found yet for tx {}", tx.id);
            }
            Err(err) => {
                log::warn!("Receipt lookup failed for tx {}: {}", tx.id, err);
            }
        }
        if !wait_for_confirmation || attempt >= setup.confirmation_poll_attempts {
            log::info!(
                "Transaction {} still unresolved after {} receipt checks",
                tx.id,
                attempt
            );
            return Ok(ProcessTransactionResult::Unresolved);
        }
        tokio::time::sleep(poll_interval).await;
    }
}
