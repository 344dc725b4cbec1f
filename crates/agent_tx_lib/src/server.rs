use crate::db::ops::{
    get_contract_list, get_status_history, get_transaction_by_uid, get_transaction_count,
    get_transactions, get_transactions_by_user, upsert_contract_list_entry, TX_FILTER_PROCESSING,
    TX_FILTER_QUEUED, TX_FILTER_UNRESOLVED, TX_ORDER_BY_CREATE_DATE,
};
use crate::events::EventBus;
use crate::model::{AllowlistAction, GasStrategy, TransactionRequest, TxStatus};
use crate::runtime::SharedState;
use crate::service::submit_transaction_request;
use crate::setup::ExecutorSetup;
use actix_cors::Cors;
use actix_web::web::Data;
use actix_web::{web, App, HttpRequest, HttpServer, Responder};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use web3::types::{Address, U256};

pub struct ServerData {
    pub shared_state: Arc<Mutex<SharedState>>,
    pub db_connection: Arc<Mutex<SqliteConnection>>,
    pub setup: ExecutorSetup,
    pub event_bus: EventBus,
}

macro_rules! return_on_error {
    ( $e:expr ) => {
        match $e {
            Ok(x) => x,
            Err(err) => {
                return web::Json(json!({
                    "error": err.to_string()
                }))
            },
        }
    }
}

/// Body of POST /api/tx. Amounts travel as decimal wei strings so agent
/// callers do not need to know hex quantity encoding.
#[derive(Deserialize, Debug)]
pub struct SubmitTxRequest {
    pub user_id: String,
    pub skill: String,
    pub intent: String,
    pub chain_id: i64,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub call_data: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub max_fee_per_gas_cap: Option<String>,
    #[serde(default)]
    pub priority_fee_cap: Option<String>,
    #[serde(default)]
    pub gas_strategy: Option<GasStrategy>,
    #[serde(default)]
    pub use_mev_protection: bool,
}

pub async fn tx_submit(
    data: Data<Box<ServerData>>,
    body: web::Json<SubmitTxRequest>,
) -> impl Responder {
    let from = return_on_error!(Address::from_str(&body.from));
    let to = return_on_error!(Address::from_str(&body.to));
    let value = match &body.value {
        Some(value) => return_on_error!(U256::from_dec_str(value)),
        None => U256::zero(),
    };
    let max_fee_per_gas_cap = match &body.max_fee_per_gas_cap {
        Some(cap) => Some(return_on_error!(U256::from_dec_str(cap))),
        None => None,
    };
    let priority_fee_cap = match &body.priority_fee_cap {
        Some(cap) => Some(return_on_error!(U256::from_dec_str(cap))),
        None => None,
    };
    let request = TransactionRequest {
        chain_id: body.chain_id,
        from,
        to,
        value,
        call_data: body.call_data.clone(),
        gas_limit: body.gas_limit,
        max_fee_per_gas_cap,
        priority_fee_cap,
        gas_strategy: body.gas_strategy,
        use_mev_protection: body.use_mev_protection,
    };

    let tx = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(
            submit_transaction_request(
                &mut db_conn,
                &data.setup,
                &data.event_bus,
                &request,
                &body.user_id,
                &body.skill,
                &body.intent,
            )
            .await
        )
    };
    data.shared_state.lock().await.inserted += 1;

    web::Json(json!({
        "tx": tx,
    }))
}

pub async fn tx_details(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let uid = match req.match_info().get("uid") {
        Some(uid) => uid,
        None => return web::Json(json!({"error": "no uid provided"})),
    };

    let (tx, history) = {
        let mut db_conn = data.db_connection.lock().await;
        let tx = return_on_error!(get_transaction_by_uid(&mut db_conn, uid).await);
        let tx = match tx {
            Some(tx) => tx,
            None => return web::Json(json!({"error": "transaction not found"})),
        };
        let history = return_on_error!(get_status_history(&mut db_conn, tx.id).await);
        (tx, history)
    };

    web::Json(json!({
        "tx": tx,
        "history": history,
    }))
}

pub async fn transactions(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let limit = req
        .match_info()
        .get("count")
        .map(|count| i64::from_str(count).ok())
        .unwrap_or(Some(100));

    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_transactions(&mut db_conn, None, limit, None).await)
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn transactions_by_user(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let user_id = match req.match_info().get("user_id") {
        Some(user_id) => user_id,
        None => return web::Json(json!({"error": "no user_id provided"})),
    };
    let status = match req.match_info().get("status") {
        Some(status) => Some(return_on_error!(TxStatus::from_str(status))),
        None => None,
    };

    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_transactions_by_user(&mut db_conn, user_id, status, None).await)
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn transactions_unresolved(
    data: Data<Box<ServerData>>,
    _req: HttpRequest,
) -> impl Responder {
    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(
            get_transactions(
                &mut db_conn,
                Some(TX_FILTER_UNRESOLVED),
                None,
                Some(TX_ORDER_BY_CREATE_DATE)
            )
            .await
        )
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn stats(data: Data<Box<ServerData>>, _req: HttpRequest) -> impl Responder {
    let queued_count = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_transaction_count(&mut db_conn, Some(TX_FILTER_QUEUED)).await)
    };
    let processing_count = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_transaction_count(&mut db_conn, Some(TX_FILTER_PROCESSING)).await)
    };
    let total_count = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_transaction_count(&mut db_conn, None).await)
    };

    let state = data.shared_state.lock().await;
    web::Json(json!({
        "txQueued": queued_count,
        "txProcessing": processing_count,
        "txTotal": total_count,
        "sessionInserted": state.inserted,
        "sessionConfirmed": state.confirmed,
        "sessionRejected": state.rejected,
        "sessionFailed": state.failed,
        "idling": state.idling,
    }))
}

pub async fn contracts(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let chain_id = req
        .match_info()
        .get("chain_id")
        .map(|chain_id| i64::from_str(chain_id).ok())
        .unwrap_or(None);

    let entries = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_contract_list(&mut db_conn, chain_id).await)
    };
    web::Json(json!({
        "contracts": entries,
    }))
}

#[derive(Deserialize, Debug)]
pub struct ContractListRequest {
    pub chain_id: i64,
    pub address: String,
    pub action: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn contract_upsert(
    data: Data<Box<ServerData>>,
    body: web::Json<ContractListRequest>,
) -> impl Responder {
    let action = return_on_error!(AllowlistAction::from_str(&body.action));
    return_on_error!(Address::from_str(&body.address));

    let entry = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(
            upsert_contract_list_entry(
                &mut db_conn,
                body.chain_id,
                &body.address,
                action,
                body.note.as_deref(),
            )
            .await
        )
    };
    web::Json(json!({
        "contract": entry,
    }))
}

pub async fn config_endpoint(data: Data<Box<ServerData>>) -> impl Responder {
    let chains: Vec<serde_json::Value> = data
        .setup
        .chain_setup
        .values()
        .map(|chain| {
            json!({
                "chainId": chain.chain_id,
                "currencySymbol": chain.currency_symbol,
                "legacyGas": chain.legacy_gas,
                "confirmationBlocks": chain.confirmation_blocks,
                "mevRelay": chain.mev_relay_url,
            })
        })
        .collect();

    web::Json(json!({
        "chains": chains,
        "maxInFlight": data.setup.max_in_flight,
    }))
}

pub async fn run_server(server_data: Data<Box<ServerData>>, listen_addr: &str) -> std::io::Result<()> {
    log::info!("Starting server on {}", listen_addr);
    HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new()
            .wrap(cors)
            .app_data(server_data.clone())
            .route("/api/tx", web::post().to(tx_submit))
            .route("/api/tx/{uid}", web::get().to(tx_details))
            .route("/api/txs", web::get().to(transactions))
            .route("/api/txs/count/{count}", web::get().to(transactions))
            .route("/api/txs/unresolved", web::get().to(transactions_unresolved))
            .route("/api/txs/user/{user_id}", web::get().to(transactions_by_user))
            .route(
                "/api/txs/user/{user_id}/{status}",
                web::get().to(transactions_by_user),
            )
            .route("/api/stats", web::get().to(stats))
            .route("/api/contracts", web::get().to(contracts))
            .route("/api/contracts/{chain_id}", web::get().to(contracts))
            .route("/api/contracts", web::post().to(contract_upsert))
            .route("/api/config", web::get().to(config_endpoint))
    })
    .bind(listen_addr)?
    .run()
    .await
}
