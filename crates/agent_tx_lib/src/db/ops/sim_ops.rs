use crate::db::model::{SimBalanceChangeDao, SimResultDao};
use crate::model::SimulationResult;
use chrono::Utc;
use sqlx::SqliteConnection;

/// Persist a simulation outcome as structured rows, balance changes keep
/// their order through the autoincrement id.
pub async fn insert_sim_result(
    conn: &mut SqliteConnection,
    tx_id: i64,
    sim: &SimulationResult,
) -> Result<SimResultDao, sqlx::Error> {
    let raw = sim.raw.as_ref().map(|v| v.to_string());
    let res = sqlx::query_as::<_, SimResultDao>(
        r"INSERT INTO sim_result
(tx_id, success, gas_estimated, error, raw, created_date)
VALUES ($1, $2, $3, $4, $5, $6) RETURNING *;
",
    )
    .bind(tx_id)
    .bind(sim.success)
    .bind(sim.gas_estimated.map(|g| g.to_string()))
    .bind(&sim.error)
    .bind(raw)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    for change in &sim.balance_changes {
        sqlx::query(
            r"INSERT INTO sim_balance_change
(tx_id, token_addr, token_symbol, amount, direction)
VALUES ($1, $2, $3, $4, $5)
",
        )
        .bind(tx_id)
        .bind(&change.token_addr)
        .bind(&change.token_symbol)
        .bind(&change.amount)
        .bind(change.direction.to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(res)
}

pub async fn get_sim_result(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Option<SimResultDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, SimResultDao>(r"SELECT * FROM sim_result WHERE tx_id = $1")
        .bind(tx_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn get_sim_balance_changes(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Vec<SimBalanceChangeDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SimBalanceChangeDao>(
        r"SELECT * FROM sim_balance_change WHERE tx_id = $1 ORDER BY id ASC",
    )
    .bind(tx_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
