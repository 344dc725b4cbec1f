use crate::contracts::decode_erc20_transfer;
use crate::db::model::TxDao;
use crate::db::ops::{get_contract_list_entry, get_user_transactions_since};
use crate::model::{
    AllowlistAction, BalanceChange, BalanceChangeDirection, GuardrailCheck, SimulationResult,
    UserLimits,
};
use crate::price::PriceFeed;
use crate::setup::ChainSetup;
use crate::utils::u256_to_rust_dec;

use crate::err_from;
use crate::error::ErrorBag;
use crate::error::ExecutorError;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::str::FromStr;
use web3::types::U256;

pub const RULE_SIM_SUCCESS: &str = "sim-success";
pub const RULE_MAX_PER_TX: &str = "max-per-tx";
pub const RULE_DAILY_CAP: &str = "daily-cap";
pub const RULE_COOLDOWN: &str = "cooldown";
pub const RULE_SLIPPAGE: &str = "slippage";
pub const RULE_DENY_LIST: &str = "deny-list";

const NATIVE_DECIMALS: u32 = 18;

/// A transaction at or above this share of the per-transaction cap
/// counts as large for cooldown purposes.
fn large_tx_threshold(limits: &UserLimits) -> Decimal {
    limits.max_per_tx_usd / Decimal::from(2)
}

/// USD value of everything the wallet pays out. Falls back to the
/// declared native value when the simulation produced no flows. None
/// means the transaction holds an asset we cannot price.
pub async fn transaction_value_usd(
    chain_setup: &ChainSetup,
    price_feed: &dyn PriceFeed,
    tx: &TxDao,
    sim: &SimulationResult,
) -> Option<Decimal> {
    let changes: Vec<BalanceChange> = if sim.balance_changes.is_empty() {
        let val = U256::from_dec_str(&tx.val).ok()?;
        if val.is_zero() {
            return Some(Decimal::ZERO);
        }
        vec![BalanceChange {
            token_addr: None,
            token_symbol: None,
            amount: val.to_string(),
            direction: BalanceChangeDirection::Out,
        }]
    } else {
        sim.balance_changes.clone()
    };

    let mut total = Decimal::ZERO;
    for change in changes
        .iter()
        .filter(|c| c.direction == BalanceChangeDirection::Out)
    {
        let amount = U256::from_dec_str(&change.amount).ok()?;
        match &change.token_addr {
            None => {
                let price = price_feed.native_usd_price(tx.chain_id).await?;
                total += u256_to_rust_dec(amount, Some(NATIVE_DECIMALS)).ok()? * price;
            }
            Some(token_addr) => {
                let decimals = chain_setup
                    .token_by_address(token_addr)
                    .map(|t| t.decimals)?;
                let price = price_feed.token_usd_price(tx.chain_id, token_addr).await?;
                total += u256_to_rust_dec(amount, Some(decimals)).ok()? * price;
            }
        }
    }
    Some(total)
}

/// Evaluate the full policy rule set. Every rule reports its result
/// even after an earlier one fails so the stored verdict is complete.
/// Err means a storage fault, not a policy decision.
pub async fn evaluate_guardrails(
    conn: &mut SqliteConnection,
    chain_setup: &ChainSetup,
    price_feed: &dyn PriceFeed,
    tx: &mut TxDao,
    limits: &UserLimits,
    sim: &SimulationResult,
) -> Result<Vec<GuardrailCheck>, ExecutorError> {
    let mut checks = Vec::new();

    checks.push(if sim.success {
        GuardrailCheck::pass(RULE_SIM_SUCCESS, "Simulation succeeded")
    } else {
        GuardrailCheck::fail(
            RULE_SIM_SUCCESS,
            &format!(
                "Simulation predicts failure: {}",
                sim.error.as_deref().unwrap_or("unknown reason")
            ),
        )
    });

    let value_usd = transaction_value_usd(chain_setup, price_feed, tx, sim).await;
    if let Some(usd) = value_usd {
        tx.val_usd = Some(usd.to_string());
    }

    checks.push(match value_usd {
        Some(usd) if usd <= limits.max_per_tx_usd => GuardrailCheck::pass(
            RULE_MAX_PER_TX,
            &format!("{} USD within per-transaction limit", usd.round_dp(2)),
        ),
        Some(usd) => GuardrailCheck::fail(
            RULE_MAX_PER_TX,
            &format!(
                "Transaction value {} USD exceeds per-transaction limit {} USD",
                usd.round_dp(2),
                limits.max_per_tx_usd
            ),
        ),
        None => GuardrailCheck::fail(
            RULE_MAX_PER_TX,
            "Unable to determine USD value of transaction",
        ),
    });

    let day_ago = Utc::now() - Duration::hours(24);
    let recent = get_user_transactions_since(conn, &tx.user_id, day_ago)
        .await
        .map_err(err_from!())?;
    let spent_today: Decimal = recent
        .iter()
        .filter(|r| r.id != tx.id)
        .filter_map(|r| r.val_usd.as_deref())
        .filter_map(|v| Decimal::from_str(v).ok())
        .sum();
    checks.push(match value_usd {
        Some(usd) if spent_today + usd <= limits.max_daily_usd => GuardrailCheck::pass(
            RULE_DAILY_CAP,
            &format!(
                "{} USD today incl. this transaction, within daily limit",
                (spent_today + usd).round_dp(2)
            ),
        ),
        Some(usd) => GuardrailCheck::fail(
            RULE_DAILY_CAP,
            &format!(
                "Daily spend {} USD plus {} USD exceeds limit {} USD",
                spent_today.round_dp(2),
                usd.round_dp(2),
                limits.max_daily_usd
            ),
        ),
        None => GuardrailCheck::fail(
            RULE_DAILY_CAP,
            "Unable to determine USD value of transaction",
        ),
    });

    let threshold = large_tx_threshold(limits);
    checks.push(match value_usd {
        Some(usd) if usd >= threshold => {
            let window_start = Utc::now() - Duration::seconds(limits.cooldown_seconds);
            let recent_large = recent
                .iter()
                .filter(|r| r.id != tx.id && r.created_date >= window_start)
                .filter_map(|r| r.val_usd.as_deref())
                .filter_map(|v| Decimal::from_str(v).ok())
                .any(|v| v >= threshold);
            if recent_large {
                GuardrailCheck::fail(
                    RULE_COOLDOWN,
                    &format!(
                        "Another large transaction ran within the last {}s cooldown",
                        limits.cooldown_seconds
                    ),
                )
            } else {
                GuardrailCheck::pass(RULE_COOLDOWN, "No recent large transaction")
            }
        }
        Some(_) => GuardrailCheck::pass(RULE_COOLDOWN, "Not a large transaction"),
        None => GuardrailCheck::pass(RULE_COOLDOWN, "No USD value, covered by max-per-tx"),
    });

    checks.push(slippage_check(tx, limits, sim));

    let entry = get_contract_list_entry(conn, tx.chain_id, &tx.to_addr)
        .await
        .map_err(err_from!())?;
    checks.push(match entry.map(|e| e.action) {
        Some(AllowlistAction::Deny) => {
            GuardrailCheck::fail(RULE_DENY_LIST, "Target address is deny-listed")
        }
        Some(AllowlistAction::Allow) => {
            GuardrailCheck::pass(RULE_DENY_LIST, "Target address is allow-listed")
        }
        None => GuardrailCheck::pass(RULE_DENY_LIST, "Target address not listed"),
    });

    Ok(checks)
}

/// Simulated out-flows may not exceed what the request declared by
/// more than the tolerated slippage. An asset flowing out that the
/// request never declared fails outright.
fn slippage_check(tx: &TxDao, limits: &UserLimits, sim: &SimulationResult) -> GuardrailCheck {
    if !sim.success || sim.balance_changes.is_empty() {
        return GuardrailCheck::pass(RULE_SLIPPAGE, "No simulated flows to compare");
    }

    let mut declared: Vec<(Option<String>, Decimal)> = Vec::new();
    if let Ok(val) = U256::from_dec_str(&tx.val) {
        if !val.is_zero() {
            if let Ok(dec) = u256_to_rust_dec(val, None) {
                declared.push((None, dec));
            }
        }
    }
    if let Some(call_data) = &tx.call_data {
        if let Ok(data) = hex::decode(call_data) {
            if let Some((_to, amount)) = decode_erc20_transfer(&data) {
                if let Ok(dec) = u256_to_rust_dec(amount, None) {
                    declared.push((Some(tx.to_addr.to_lowercase()), dec));
                }
            }
        }
    }

    let tolerance =
        (Decimal::from(10000) + Decimal::from(limits.max_slippage_bps)) / Decimal::from(10000);
    for change in sim
        .balance_changes
        .iter()
        .filter(|c| c.direction == BalanceChangeDirection::Out)
    {
        let Ok(amount) = U256::from_dec_str(&change.amount) else {
            return GuardrailCheck::fail(RULE_SLIPPAGE, "Unparseable simulated amount");
        };
        let Ok(simulated) = u256_to_rust_dec(amount, None) else {
            return GuardrailCheck::fail(RULE_SLIPPAGE, "Simulated amount out of range");
        };
        let key = change.token_addr.as_ref().map(|a| a.to_lowercase());
        let expected = declared
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or(Decimal::ZERO);
        if simulated > expected * tolerance {
            let asset = change
                .token_addr
                .as_deref()
                .unwrap_or("native currency");
            return GuardrailCheck::fail(
                RULE_SLIPPAGE,
                &format!(
                    "Simulated outflow of {} exceeds declared amount beyond {} bps tolerance",
                    asset, limits.max_slippage_bps
                ),
            );
        }
    }
    GuardrailCheck::pass(RULE_SLIPPAGE, "Simulated flows within declared bounds")
}
