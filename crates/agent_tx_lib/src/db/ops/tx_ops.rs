use crate::db::model::{TxDao, TxStatusEventDao};
use crate::model::TxStatus;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub const TX_FILTER_ALL: &str = "id >= 0";
pub const TX_FILTER_QUEUED: &str = "status = 'pending' AND first_processed IS NULL";
pub const TX_FILTER_PROCESSING: &str =
    "first_processed IS NOT NULL AND status NOT IN ('confirmed', 'failed', 'rejected')";
pub const TX_FILTER_UNRESOLVED: &str = "status = 'broadcast'";
pub const TX_ORDER_BY_CREATE_DATE: &str = "created_date ASC";

pub async fn insert_tx(conn: &mut SqliteConnection, tx: &TxDao) -> Result<TxDao, sqlx::Error> {
    let res = sqlx::query_as::<_, TxDao>(
        r"INSERT INTO tx
(uid, user_id, skill, intent, chain_id, from_addr, to_addr, val, val_usd, call_data, gas_limit, max_fee_per_gas, priority_fee, max_fee_cap, priority_fee_cap, gas_strategy, use_mev_protection, mev_relay_used, nonce, status, tx_hash, signed_raw_data, signed_date, broadcast_date, broadcast_count, confirm_date, block_number, gas_used, effective_gas_price, fee_paid, error, created_date, updated_date, first_processed)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34) RETURNING *;
",
    )
    .bind(&tx.uid)
    .bind(&tx.user_id)
    .bind(&tx.skill)
    .bind(&tx.intent)
    .bind(tx.chain_id)
    .bind(&tx.from_addr)
    .bind(&tx.to_addr)
    .bind(&tx.val)
    .bind(&tx.val_usd)
    .bind(&tx.call_data)
    .bind(tx.gas_limit)
    .bind(&tx.max_fee_per_gas)
    .bind(&tx.priority_fee)
    .bind(&tx.max_fee_cap)
    .bind(&tx.priority_fee_cap)
    .bind(tx.gas_strategy)
    .bind(tx.use_mev_protection)
    .bind(tx.mev_relay_used)
    .bind(tx.nonce)
    .bind(tx.status)
    .bind(&tx.tx_hash)
    .bind(&tx.signed_raw_data)
    .bind(tx.signed_date)
    .bind(tx.broadcast_date)
    .bind(tx.broadcast_count)
    .bind(tx.confirm_date)
    .bind(tx.block_number)
    .bind(&tx.gas_used)
    .bind(&tx.effective_gas_price)
    .bind(&tx.fee_paid)
    .bind(&tx.error)
    .bind(tx.created_date)
    .bind(tx.updated_date)
    .bind(tx.first_processed)
    .fetch_one(conn)
    .await?;
    Ok(res)
}

pub async fn update_tx(conn: &mut SqliteConnection, tx: &mut TxDao) -> Result<(), sqlx::Error> {
    tx.updated_date = Utc::now();
    let _res = sqlx::query(
        r"UPDATE tx SET
user_id = $2,
skill = $3,
intent = $4,
chain_id = $5,
from_addr = $6,
to_addr = $7,
val = $8,
val_usd = $9,
call_data = $10,
gas_limit = $11,
max_fee_per_gas = $12,
priority_fee = $13,
max_fee_cap = $14,
priority_fee_cap = $15,
gas_strategy = $16,
use_mev_protection = $17,
mev_relay_used = $18,
nonce = $19,
status = $20,
tx_hash = $21,
signed_raw_data = $22,
signed_date = $23,
broadcast_date = $24,
broadcast_count = $25,
confirm_date = $26,
block_number = $27,
gas_used = $28,
effective_gas_price = $29,
fee_paid = $30,
error = $31,
updated_date = $32,
first_processed = $33
WHERE id = $1
",
    )
    .bind(tx.id)
    .bind(&tx.user_id)
    .bind(&tx.skill)
    .bind(&tx.intent)
    .bind(tx.chain_id)
    .bind(&tx.from_addr)
    .bind(&tx.to_addr)
    .bind(&tx.val)
    .bind(&tx.val_usd)
    .bind(&tx.call_data)
    .bind(tx.gas_limit)
    .bind(&tx.max_fee_per_gas)
    .bind(&tx.priority_fee)
    .bind(&tx.max_fee_cap)
    .bind(&tx.priority_fee_cap)
    .bind(tx.gas_strategy)
    .bind(tx.use_mev_protection)
    .bind(tx.mev_relay_used)
    .bind(tx.nonce)
    .bind(tx.status)
    .bind(&tx.tx_hash)
    .bind(&tx.signed_raw_data)
    .bind(tx.signed_date)
    .bind(tx.broadcast_date)
    .bind(tx.broadcast_count)
    .bind(tx.confirm_date)
    .bind(tx.block_number)
    .bind(&tx.gas_used)
    .bind(&tx.effective_gas_price)
    .bind(&tx.fee_paid)
    .bind(&tx.error)
    .bind(tx.updated_date)
    .bind(tx.first_processed)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_transaction(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<TxDao, sqlx::Error> {
    let row = sqlx::query_as::<_, TxDao>(r"SELECT * FROM tx WHERE id = $1")
        .bind(tx_id)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub async fn get_transaction_by_uid(
    conn: &mut SqliteConnection,
    uid: &str,
) -> Result<Option<TxDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, TxDao>(r"SELECT * FROM tx WHERE uid = $1")
        .bind(uid)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn get_transactions(
    conn: &mut SqliteConnection,
    filter: Option<&str>,
    limit: Option<i64>,
    order: Option<&str>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let limit = limit.unwrap_or(i64::MAX);
    let filter = filter.unwrap_or(TX_FILTER_ALL);
    let order = order.unwrap_or("id DESC");
    let rows = sqlx::query_as::<_, TxDao>(
        format!(
            r"SELECT * FROM tx WHERE {} ORDER BY {} LIMIT {}",
            filter, order, limit
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_next_transactions_to_process(
    conn: &mut SqliteConnection,
    limit: i64,
) -> Result<Vec<TxDao>, sqlx::Error> {
    get_transactions(
        conn,
        Some(TX_FILTER_QUEUED),
        Some(limit),
        Some(TX_ORDER_BY_CREATE_DATE),
    )
    .await
}

pub async fn get_transactions_by_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    status: Option<TxStatus>,
    limit: Option<i64>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let limit = limit.unwrap_or(i64::MAX);
    let rows = if let Some(status) = status {
        sqlx::query_as::<_, TxDao>(
            r"SELECT * FROM tx WHERE user_id = $1 AND status = $2 ORDER BY id DESC LIMIT $3",
        )
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .fetch_all(conn)
        .await?
    } else {
        sqlx::query_as::<_, TxDao>(
            r"SELECT * FROM tx WHERE user_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(conn)
        .await?
    };
    Ok(rows)
}

pub async fn get_transactions_by_status(
    conn: &mut SqliteConnection,
    status: TxStatus,
    limit: Option<i64>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let limit = limit.unwrap_or(i64::MAX);
    let rows =
        sqlx::query_as::<_, TxDao>(r"SELECT * FROM tx WHERE status = $1 ORDER BY id DESC LIMIT $2")
            .bind(status)
            .bind(limit)
            .fetch_all(conn)
            .await?;
    Ok(rows)
}

/// Recent history used by the daily cap and cooldown rules. Rejected and
/// failed attempts never spent anything, so they are skipped.
pub async fn get_user_transactions_since(
    conn: &mut SqliteConnection,
    user_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        r"SELECT * FROM tx
WHERE user_id = $1
AND created_date >= $2
AND status NOT IN ('rejected', 'failed')
ORDER BY created_date DESC
",
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_transaction_count(
    conn: &mut SqliteConnection,
    filter: Option<&str>,
) -> Result<usize, sqlx::Error> {
    let filter = filter.unwrap_or(TX_FILTER_ALL);
    let count =
        sqlx::query_scalar::<_, i64>(format!(r"SELECT COUNT(*) FROM tx WHERE {}", filter).as_str())
            .fetch_one(conn)
            .await?;
    Ok(count as usize)
}

pub async fn insert_status_event(
    conn: &mut SqliteConnection,
    tx_id: i64,
    from_status: Option<TxStatus>,
    to_status: TxStatus,
    note: Option<&str>,
) -> Result<TxStatusEventDao, sqlx::Error> {
    let res = sqlx::query_as::<_, TxStatusEventDao>(
        r"INSERT INTO tx_status_history
(tx_id, from_status, to_status, note, created_date)
VALUES ($1, $2, $3, $4, $5) RETURNING *;
",
    )
    .bind(tx_id)
    .bind(from_status)
    .bind(to_status)
    .bind(note)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(res)
}

pub async fn get_status_history(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Vec<TxStatusEventDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxStatusEventDao>(
        r"SELECT * FROM tx_status_history WHERE tx_id = $1 ORDER BY id ASC",
    )
    .bind(tx_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
