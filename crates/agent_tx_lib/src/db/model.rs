use crate::model::{AllowlistAction, GasStrategy, TxStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Durable projection of one transaction attempt. Mutated only through
/// `db::ops`, never deleted.
#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TxDao {
    pub id: i64,
    /// External identity, uuid v4.
    pub uid: String,
    pub user_id: String,
    /// Skill that originated the request, e.g. "swap" or "transfer".
    pub skill: String,
    /// Human readable description of what the agent meant to do.
    pub intent: String,
    pub chain_id: i64,
    pub from_addr: String,
    pub to_addr: String,
    pub val: String,
    /// USD value assigned at valuation time, used by the daily cap rule.
    pub val_usd: Option<String>,
    #[serde(skip_serializing)]
    pub call_data: Option<String>,
    pub gas_limit: Option<i64>,
    pub max_fee_per_gas: Option<String>,
    pub priority_fee: Option<String>,
    /// Caller imposed upper bounds for the fee bid, in wei.
    pub max_fee_cap: Option<String>,
    pub priority_fee_cap: Option<String>,
    pub gas_strategy: GasStrategy,
    pub use_mev_protection: bool,
    pub mev_relay_used: bool,
    pub nonce: Option<i64>,
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    #[serde(skip_serializing)]
    pub signed_raw_data: Option<String>,
    pub signed_date: Option<DateTime<Utc>>,
    pub broadcast_date: Option<DateTime<Utc>>,
    pub broadcast_count: i64,
    pub confirm_date: Option<DateTime<Utc>>,
    pub block_number: Option<i64>,
    pub gas_used: Option<String>,
    pub effective_gas_price: Option<String>,
    pub fee_paid: Option<String>,
    pub error: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub first_processed: Option<DateTime<Utc>>,
}

/// Append-only status transition history, one row per transition.
#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusEventDao {
    pub id: i64,
    pub tx_id: i64,
    pub from_status: Option<TxStatus>,
    pub to_status: TxStatus,
    pub note: Option<String>,
    pub created_date: DateTime<Utc>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SimResultDao {
    pub id: i64,
    pub tx_id: i64,
    pub success: bool,
    pub gas_estimated: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing)]
    pub raw: Option<String>,
    pub created_date: DateTime<Utc>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SimBalanceChangeDao {
    pub id: i64,
    pub tx_id: i64,
    pub token_addr: Option<String>,
    pub token_symbol: Option<String>,
    pub amount: String,
    pub direction: String,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailCheckDao {
    pub id: i64,
    pub tx_id: i64,
    pub rule: String,
    pub passed: bool,
    pub message: String,
    pub created_date: DateTime<Utc>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserLimitsDao {
    pub user_id: String,
    pub max_per_tx_usd: String,
    pub max_daily_usd: String,
    pub cooldown_seconds: i64,
    pub max_slippage_bps: i64,
    pub updated_date: DateTime<Utc>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContractListEntryDao {
    pub id: i64,
    pub chain_id: i64,
    pub address: String,
    pub action: AllowlistAction,
    pub note: Option<String>,
    pub added_date: DateTime<Utc>,
}
