use crate::db::model::GuardrailCheckDao;
use crate::model::GuardrailCheck;
use chrono::Utc;
use sqlx::SqliteConnection;

/// Every evaluated rule is stored, passed or not, so the audit trail
/// shows the full policy decision for a transaction.
pub async fn insert_guardrail_checks(
    conn: &mut SqliteConnection,
    tx_id: i64,
    checks: &[GuardrailCheck],
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    for check in checks {
        sqlx::query(
            r"INSERT INTO guardrail_check
(tx_id, rule, passed, message, created_date)
VALUES ($1, $2, $3, $4, $5)
",
        )
        .bind(tx_id)
        .bind(&check.rule)
        .bind(check.passed)
        .bind(&check.message)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn get_guardrail_checks(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Vec<GuardrailCheckDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, GuardrailCheckDao>(
        r"SELECT * FROM guardrail_check WHERE tx_id = $1 ORDER BY id ASC",
    )
    .bind(tx_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
