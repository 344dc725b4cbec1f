use crate::db::model::ContractListEntryDao;
use crate::model::AllowlistAction;
use chrono::Utc;
use sqlx::SqliteConnection;

/// Addresses are stored lowercase so lookups are case-insensitive.
pub async fn upsert_contract_list_entry(
    conn: &mut SqliteConnection,
    chain_id: i64,
    address: &str,
    action: AllowlistAction,
    note: Option<&str>,
) -> Result<ContractListEntryDao, sqlx::Error> {
    let row = sqlx::query_as::<_, ContractListEntryDao>(
        r"INSERT INTO contract_list
(chain_id, address, action, note, added_date)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT(chain_id, address) DO UPDATE SET
action = $3,
note = $4
RETURNING *;
",
    )
    .bind(chain_id)
    .bind(address.to_lowercase())
    .bind(action)
    .bind(note)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(row)
}

pub async fn get_contract_list_entry(
    conn: &mut SqliteConnection,
    chain_id: i64,
    address: &str,
) -> Result<Option<ContractListEntryDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, ContractListEntryDao>(
        r"SELECT * FROM contract_list WHERE chain_id = $1 AND address = $2",
    )
    .bind(chain_id)
    .bind(address.to_lowercase())
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get_contract_list(
    conn: &mut SqliteConnection,
    chain_id: Option<i64>,
) -> Result<Vec<ContractListEntryDao>, sqlx::Error> {
    let rows = match chain_id {
        Some(chain_id) => {
            sqlx::query_as::<_, ContractListEntryDao>(
                r"SELECT * FROM contract_list WHERE chain_id = $1 ORDER BY id ASC",
            )
            .bind(chain_id)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, ContractListEntryDao>(
                r"SELECT * FROM contract_list ORDER BY id ASC",
            )
            .fetch_all(conn)
            .await?
        }
    };
    Ok(rows)
}
