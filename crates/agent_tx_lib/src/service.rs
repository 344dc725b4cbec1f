use crate::db::model::TxDao;
use crate::db::ops::{
    get_next_transactions_to_process, get_transaction_count, get_transactions,
    insert_status_event, insert_tx, TX_FILTER_PROCESSING, TX_FILTER_QUEUED,
    TX_ORDER_BY_CREATE_DATE,
};
use crate::error::{CustomError, ErrorBag, ExecutorError};
use crate::events::{EventBus, StatusUpdate};
use crate::model::{TransactionRequest, TxStatus};
use crate::process::{
    advance_status, process_transaction, ExecutorContext, ProcessTransactionResult,
};
use crate::runtime::SharedState;
use crate::setup::ExecutorSetup;
use crate::transaction::create_transaction;
use crate::{err_custom_create, err_from};
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Validate an agent request and append it to the queue. The service
/// loop picks it up on its next pass, this call never touches the chain.
#[allow(clippy::too_many_arguments)]
pub async fn submit_transaction_request(
    conn: &mut SqliteConnection,
    setup: &ExecutorSetup,
    event_bus: &EventBus,
    request: &TransactionRequest,
    user_id: &str,
    skill: &str,
    intent: &str,
) -> Result<TxDao, ExecutorError> {
    setup.get_chain_setup(request.chain_id)?;
    if let Some(call_data) = &request.call_data {
        hex::decode(call_data)
            .map_err(|_| err_custom_create!("Call data is not valid hex: {}", call_data))?;
    }
    if let (Some(max_fee_cap), Some(priority_cap)) =
        (request.max_fee_per_gas_cap, request.priority_fee_cap)
    {
        if priority_cap > max_fee_cap {
            return Err(err_custom_create!(
                "Priority fee cap {} exceeds max fee cap {}",
                priority_cap,
                max_fee_cap
            ));
        }
    }

    let tx = create_transaction(request, user_id, skill, intent);
    let tx = insert_tx(conn, &tx).await.map_err(err_from!())?;
    insert_status_event(conn, tx.id, None, TxStatus::Pending, None)
        .await
        .map_err(err_from!())?;
    event_bus.emit(StatusUpdate::for_tx(&tx, None, TxStatus::Pending));
    log::info!(
        "Queued transaction {} for user {} on chain {}: {}",
        tx.uid,
        user_id,
        tx.chain_id,
        intent
    );
    Ok(tx)
}

/// Fold a processing outcome into the shared counters. Terminal rows are
/// counted exactly once because the work filter stops returning them.
pub async fn update_tx_result(
    shared_state: &Arc<Mutex<SharedState>>,
    tx: &TxDao,
    process_t_res: &ProcessTransactionResult,
) {
    let mut state = shared_state.lock().await;
    match process_t_res {
        ProcessTransactionResult::Confirmed => {
            state.confirmed += 1;
        }
        ProcessTransactionResult::Rejected(_reason) => {
            state.rejected += 1;
        }
        ProcessTransactionResult::NeedRetry(err) => {
            log::warn!("Transaction {} will be retried: {}", tx.id, err);
        }
        ProcessTransactionResult::InternalError(err) => {
            state.failed += 1;
            log::error!("Transaction {} failed: {}", tx.id, err);
        }
        ProcessTransactionResult::Unresolved => {
            log::debug!("Transaction {} still waiting for confirmation", tx.id);
        }
    }
}

/// A technical fault leaves the row where it was so a later pass can try
/// again, unless the row has been stuck since before the chain's
/// transaction timeout and no funds can be in motion yet.
async fn handle_technical_error(
    conn: &mut SqliteConnection,
    tx: &mut TxDao,
    setup: &ExecutorSetup,
    ctx: &ExecutorContext,
    err: &ExecutorError,
) -> Result<ProcessTransactionResult, ExecutorError> {
    log::error!("Technical error processing transaction {}: {}", tx.id, err);

    let Ok(chain_setup) = setup.get_chain_setup(tx.chain_id) else {
        // No retry can fix a chain that is gone from the configuration.
        let reason = format!("Chain {} is not configured", tx.chain_id);
        tx.error = Some(reason.clone());
        advance_status(conn, tx, ctx, TxStatus::Failed, Some(&reason)).await?;
        return Ok(ProcessTransactionResult::InternalError(reason));
    };

    // Once a row is signed or broadcast the nonce may be live on chain,
    // those rows are never timed out here.
    let pre_broadcast = matches!(
        tx.status,
        TxStatus::Pending | TxStatus::Simulated | TxStatus::Approved
    );
    let elapsed = tx
        .first_processed
        .map(|first| (chrono::Utc::now() - first).num_seconds())
        .unwrap_or(0);
    if pre_broadcast && elapsed > chain_setup.transaction_timeout as i64 {
        let reason = format!("Technical errors for {}s, giving up: {}", elapsed, err);
        tx.error = Some(reason.clone());
        advance_status(conn, tx, ctx, TxStatus::Failed, Some(&reason)).await?;
        return Ok(ProcessTransactionResult::InternalError(reason));
    }
    Ok(ProcessTransactionResult::NeedRetry(err.to_string()))
}

/// One pass over the work queue. Rows already in flight go first, then
/// fresh submissions fill the batch up to max_in_flight. Returns how
/// many rows still need attention after the pass.
pub async fn process_transactions(
    shared_state: &Arc<Mutex<SharedState>>,
    conn: &mut SqliteConnection,
    setup: &ExecutorSetup,
    ctx: &ExecutorContext,
) -> Result<usize, ExecutorError> {
    let limit = setup.max_in_flight as i64;
    let mut transactions = get_transactions(
        conn,
        Some(TX_FILTER_PROCESSING),
        Some(limit),
        Some(TX_ORDER_BY_CREATE_DATE),
    )
    .await
    .map_err(err_from!())?;
    if (transactions.len() as i64) < limit {
        let queued = get_next_transactions_to_process(conn, limit - transactions.len() as i64)
            .await
            .map_err(err_from!())?;
        transactions.extend(queued);
    }

    for tx in &mut transactions {
        let process_t_res = match process_transaction(conn, tx, setup, ctx, false).await {
            Ok(res) => res,
            Err(err) => handle_technical_error(conn, tx, setup, ctx, &err).await?,
        };
        update_tx_result(shared_state, tx, &process_t_res).await;
    }

    let in_flight = get_transaction_count(conn, Some(TX_FILTER_PROCESSING))
        .await
        .map_err(err_from!())?;
    let queued = get_transaction_count(conn, Some(TX_FILTER_QUEUED))
        .await
        .map_err(err_from!())?;
    Ok(in_flight + queued)
}

pub async fn service_loop(
    shared_state: Arc<Mutex<SharedState>>,
    conn: &mut SqliteConnection,
    setup: &ExecutorSetup,
    ctx: &ExecutorContext,
) {
    let process_interval = chrono::Duration::seconds(setup.process_sleep as i64);
    let mut last_processing_time = chrono::Utc::now() - process_interval;
    loop {
        let current_time = chrono::Utc::now();
        if current_time < last_processing_time {
            //handle case when system time changed
            last_processing_time = current_time;
        }

        if current_time >= last_processing_time + process_interval {
            log::debug!("Processing transactions...");
            match process_transactions(&shared_state, conn, setup, ctx).await {
                Ok(pending) => {
                    shared_state.lock().await.idling = pending == 0;
                    if pending == 0 && setup.finish_when_done {
                        log::info!("All transactions processed, stopping service loop");
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Error in process transactions: {}", e);
                }
            }
            last_processing_time = current_time;
        }

        tokio::time::sleep(Duration::from_secs(setup.service_sleep)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;
    use crate::db::ops::{
        get_status_history, get_transaction, insert_sim_result, update_tx,
        upsert_contract_list_entry,
    };
    use crate::model::{AllowlistAction, SimulationResult, UserLimits};
    use crate::nonce::NonceManager;
    use crate::price::StaticPriceFeed;
    use crate::process::StaticApproval;
    use crate::retry::RetryPolicy;
    use crate::risk::RiskEngine;
    use crate::setup::test_helpers::executor_setup_for_tests;
    use crate::signer::LocalSigner;
    use crate::transaction::create_native_transfer;
    use rust_decimal::Decimal;
    use secp256k1::SecretKey;
    use std::str::FromStr;
    use web3::types::{Address, U256};

    const TEST_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    fn test_context() -> (ExecutorContext, Address) {
        let secret_key = SecretKey::from_str(TEST_KEY).unwrap();
        let from_addr = crate::eth::get_eth_addr_from_secret(&secret_key);
        let ctx = ExecutorContext {
            risk_engine: RiskEngine::new(&Default::default()).unwrap(),
            nonce_manager: NonceManager::default(),
            signer: Arc::new(LocalSigner::new(vec![secret_key])),
            mev_relay: None,
            price_feed: Arc::new(StaticPriceFeed::single_chain(1, Decimal::from(1000))),
            event_bus: EventBus::new(64),
            approval: Arc::new(StaticApproval { approve: false }),
            default_limits: UserLimits::default(),
            block_on_unknown: false,
            fee_retry: RetryPolicy::new(1, 1),
        };
        (ctx, from_addr)
    }

    fn transfer_request(from: Address) -> TransactionRequest {
        let to = Address::from_str("0x000000000000000000000000000000000000dEaD").unwrap();
        TransactionRequest {
            chain_id: 1,
            from,
            to,
            value: U256::from(100_000_000_000_000_000u64),
            call_data: None,
            gas_limit: None,
            max_fee_per_gas_cap: None,
            priority_fee_cap: None,
            gas_strategy: None,
            use_mev_protection: false,
        }
    }

    /// A row that the policy stage will reject, parked mid-pipeline the
    /// way a restart would leave it.
    async fn insert_rejectable_tx(conn: &mut SqliteConnection, from: Address) -> TxDao {
        let to = Address::from_str("0x000000000000000000000000000000000000dEaD").unwrap();
        let mut tx = create_native_transfer(
            "user-1",
            "payments",
            from,
            to,
            1,
            U256::from(100_000_000_000_000_000u64),
        );
        tx.gas_limit = Some(21000);
        tx.first_processed = Some(chrono::Utc::now());
        let mut tx = insert_tx(conn, &tx).await.unwrap();
        let sim = SimulationResult::failed("Execution reverted: transfer amount exceeds balance");
        insert_sim_result(conn, tx.id, &sim).await.unwrap();
        tx.status = TxStatus::Simulated;
        update_tx(conn, &mut tx).await.unwrap();
        upsert_contract_list_entry(conn, 1, &tx.to_addr, AllowlistAction::Allow, None)
            .await
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_submit_queues_pending_row() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let setup = executor_setup_for_tests(1);
        let (ctx, from) = test_context();
        let mut events = ctx.event_bus.subscribe();

        let request = transfer_request(from);
        let tx = submit_transaction_request(
            &mut conn,
            &setup,
            &ctx.event_bus,
            &request,
            "user-1",
            "payments",
            "send funds to treasury",
        )
        .await
        .unwrap();

        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.first_processed.is_none());
        let stored = get_transaction(&mut conn, tx.id).await.unwrap();
        assert_eq!(stored.intent, "send funds to treasury");
        let history = get_status_history(&mut conn, tx.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[0].to_status, TxStatus::Pending);

        let update = events.recv().await.unwrap();
        assert_eq!(update.uid, tx.uid);
        assert_eq!(update.to_status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_requests() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let setup = executor_setup_for_tests(1);
        let (ctx, from) = test_context();

        let mut unknown_chain = transfer_request(from);
        unknown_chain.chain_id = 999;
        let err = submit_transaction_request(
            &mut conn,
            &setup,
            &ctx.event_bus,
            &unknown_chain,
            "user-1",
            "payments",
            "transfer",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No chain setup"));

        let mut bad_data = transfer_request(from);
        bad_data.call_data = Some("not-hex".to_string());
        let err = submit_transaction_request(
            &mut conn,
            &setup,
            &ctx.event_bus,
            &bad_data,
            "user-1",
            "payments",
            "transfer",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not valid hex"));

        let mut bad_caps = transfer_request(from);
        bad_caps.max_fee_per_gas_cap = Some(U256::from(1_000_000_000u64));
        bad_caps.priority_fee_cap = Some(U256::from(2_000_000_000u64));
        let err = submit_transaction_request(
            &mut conn,
            &setup,
            &ctx.event_bus,
            &bad_caps,
            "user-1",
            "payments",
            "transfer",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("exceeds max fee cap"));

        assert_eq!(get_transaction_count(&mut conn, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_process_pass_counts_outcomes() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let setup = executor_setup_for_tests(1);
        let (ctx, from) = test_context();
        let shared_state = Arc::new(Mutex::new(SharedState::default()));

        // One row resumes mid-pipeline and gets rejected, one fresh row
        // hits the unreachable node and stays queued for a retry.
        let rejectable = insert_rejectable_tx(&mut conn, from).await;
        let fresh = submit_transaction_request(
            &mut conn,
            &setup,
            &ctx.event_bus,
            &transfer_request(from),
            "user-2",
            "payments",
            "transfer",
        )
        .await
        .unwrap();

        let pending = process_transactions(&shared_state, &mut conn, &setup, &ctx)
            .await
            .unwrap();
        assert_eq!(pending, 1);

        let state = shared_state.lock().await;
        assert_eq!(state.rejected, 1);
        assert_eq!(state.confirmed, 0);
        assert_eq!(state.failed, 0);
        drop(state);

        let stored = get_transaction(&mut conn, rejectable.id).await.unwrap();
        assert_eq!(stored.status, TxStatus::Rejected);
        let stored = get_transaction(&mut conn, fresh.id).await.unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
        assert!(stored.first_processed.is_some());
    }

    #[tokio::test]
    async fn test_stuck_row_fails_after_transaction_timeout() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let setup = executor_setup_for_tests(1);
        let (ctx, from) = test_context();
        let shared_state = Arc::new(Mutex::new(SharedState::default()));

        let to = Address::from_str("0x000000000000000000000000000000000000dEaD").unwrap();
        let mut tx = create_native_transfer("user-1", "payments", from, to, 1, U256::from(1u64));
        // Stuck since well past the chain's transaction timeout.
        tx.first_processed = Some(chrono::Utc::now() - chrono::Duration::seconds(400));
        let tx = insert_tx(&mut conn, &tx).await.unwrap();

        let pending = process_transactions(&shared_state, &mut conn, &setup, &ctx)
            .await
            .unwrap();
        assert_eq!(pending, 0);
        assert_eq!(shared_state.lock().await.failed, 1);

        let stored = get_transaction(&mut conn, tx.id).await.unwrap();
        assert_eq!(stored.status, TxStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("giving up"));
    }

    #[tokio::test]
    async fn test_service_loop_drains_queue_and_stops() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let setup = executor_setup_for_tests(1);
        let (ctx, from) = test_context();
        let shared_state = Arc::new(Mutex::new(SharedState::default()));

        insert_rejectable_tx(&mut conn, from).await;

        tokio::time::timeout(
            Duration::from_secs(30),
            service_loop(shared_state.clone(), &mut conn, &setup, &ctx),
        )
        .await
        .unwrap();

        let state = shared_state.lock().await;
        assert_eq!(state.rejected, 1);
        assert!(state.idling);
    }
}
