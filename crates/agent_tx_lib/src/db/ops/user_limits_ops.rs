use crate::db::model::UserLimitsDao;
use crate::model::UserLimits;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::str::FromStr;

pub async fn get_user_limits(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<UserLimitsDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, UserLimitsDao>(r"SELECT * FROM user_limits WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn upsert_user_limits(
    conn: &mut SqliteConnection,
    user_id: &str,
    limits: &UserLimits,
) -> Result<UserLimitsDao, sqlx::Error> {
    let row = sqlx::query_as::<_, UserLimitsDao>(
        r"INSERT INTO user_limits
(user_id, max_per_tx_usd, max_daily_usd, cooldown_seconds, max_slippage_bps, updated_date)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT(user_id) DO UPDATE SET
max_per_tx_usd = $2,
max_daily_usd = $3,
cooldown_seconds = $4,
max_slippage_bps = $5,
updated_date = $6
RETURNING *;
",
    )
    .bind(user_id)
    .bind(limits.max_per_tx_usd.to_string())
    .bind(limits.max_daily_usd.to_string())
    .bind(limits.cooldown_seconds)
    .bind(limits.max_slippage_bps)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Stored limits are strings, bad rows fall back to the field default.
pub fn limits_from_dao(dao: &UserLimitsDao) -> UserLimits {
    let defaults = UserLimits::default();
    UserLimits {
        max_per_tx_usd: Decimal::from_str(&dao.max_per_tx_usd)
            .unwrap_or(defaults.max_per_tx_usd),
        max_daily_usd: Decimal::from_str(&dao.max_daily_usd).unwrap_or(defaults.max_daily_usd),
        cooldown_seconds: dao.cooldown_seconds,
        max_slippage_bps: dao.max_slippage_bps,
    }
}

/// Effective limits for a user, falling back to configured defaults when
/// no per-user row exists.
pub async fn get_effective_limits(
    conn: &mut SqliteConnection,
    user_id: &str,
    defaults: &UserLimits,
) -> Result<UserLimits, sqlx::Error> {
    Ok(match get_user_limits(conn, user_id).await? {
        Some(dao) => limits_from_dao(&dao),
        None => defaults.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;

    #[tokio::test]
    async fn test_absent_row_yields_defaults() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let defaults = UserLimits::default();
        let limits = get_effective_limits(&mut conn, "nobody", &defaults)
            .await
            .unwrap();
        assert_eq!(limits.max_per_tx_usd, defaults.max_per_tx_usd);
        assert_eq!(limits.cooldown_seconds, defaults.cooldown_seconds);
    }

    #[tokio::test]
    async fn test_stored_row_overrides_defaults() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let custom = UserLimits {
            max_per_tx_usd: Decimal::from(250),
            max_daily_usd: Decimal::from(800),
            cooldown_seconds: 120,
            max_slippage_bps: 50,
        };
        upsert_user_limits(&mut conn, "user-1", &custom).await.unwrap();

        let limits = get_effective_limits(&mut conn, "user-1", &UserLimits::default())
            .await
            .unwrap();
        assert_eq!(limits.max_per_tx_usd, Decimal::from(250));
        assert_eq!(limits.max_daily_usd, Decimal::from(800));
        assert_eq!(limits.cooldown_seconds, 120);
        assert_eq!(limits.max_slippage_bps, 50);

        // second upsert for the same user replaces, not duplicates
        let tightened = UserLimits {
            max_per_tx_usd: Decimal::from(100),
            ..custom
        };
        upsert_user_limits(&mut conn, "user-1", &tightened).await.unwrap();
        let limits = get_effective_limits(&mut conn, "user-1", &UserLimits::default())
            .await
            .unwrap();
        assert_eq!(limits.max_per_tx_usd, Decimal::from(100));
    }
}
