use crate::contracts::{decode_erc20_transfer, is_erc20_approve};
use crate::db::model::TxDao;
use crate::db::ops::{get_sim_balance_changes, get_sim_result};
use crate::model::{BalanceChange, BalanceChangeDirection, SimulationResult};
use crate::transaction::dao_to_call_request;

use crate::error::ExecutorError;
use crate::error::{CustomError, ErrorBag};
use crate::{err_custom_create, err_from};
use sqlx::SqliteConnection;
use std::str::FromStr;
use std::time::Duration;
use web3::transports::Http;
use web3::types::U256;
use web3::Web3;

/// Dry-run a queued transaction against the node. A revert comes back
/// as an unsuccessful result, only transport problems surface as Err so
/// the caller can retry them.
pub async fn simulate_transaction(
    web3: &Web3<Http>,
    tx: &TxDao,
    timeout_secs: u64,
) -> Result<SimulationResult, ExecutorError> {
    let mut call_request = dao_to_call_request(tx)?;
    call_request.gas = None;

    let estimate = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        web3.eth().estimate_gas(call_request, None),
    )
    .await
    .map_err(|_| err_custom_create!("Simulation timed out after {}s", timeout_secs))?;

    match estimate {
        Ok(gas_est) => Ok(SimulationResult {
            success: true,
            gas_estimated: Some(gas_est),
            balance_changes: extract_balance_changes(tx),
            error: None,
            raw: None,
        }),
        Err(web3::Error::Rpc(rpc_err)) => Ok(SimulationResult {
            success: false,
            gas_estimated: None,
            balance_changes: vec![],
            error: Some(format!("Execution reverted: {}", rpc_err.message)),
            raw: serde_json::to_value(&rpc_err).ok(),
        }),
        Err(e) => Err(e).map_err(err_from!()),
    }
}

/// Rebuild a stored simulation outcome, used when a transaction is
/// picked up again after a restart.
pub async fn load_simulation(
    conn: &mut SqliteConnection,
    tx_id: i64,
) -> Result<Option<SimulationResult>, ExecutorError> {
    let Some(dao) = get_sim_result(conn, tx_id).await.map_err(err_from!())? else {
        return Ok(None);
    };
    let gas_estimated = dao
        .gas_estimated
        .as_ref()
        .map(|g| U256::from_dec_str(g))
        .transpose()
        .map_err(err_from!())?;
    let mut balance_changes = Vec::new();
    for row in get_sim_balance_changes(conn, tx_id).await.map_err(err_from!())? {
        let direction = BalanceChangeDirection::from_str(&row.direction)
            .map_err(|e| err_custom_create!("{}", e))?;
        balance_changes.push(BalanceChange {
            token_addr: row.token_addr,
            token_symbol: row.token_symbol,
            amount: row.amount,
            direction,
        });
    }
    Ok(Some(SimulationResult {
        success: dao.success,
        gas_estimated,
        balance_changes,
        error: dao.error,
        raw: dao.raw.as_ref().and_then(|r| serde_json::from_str(r).ok()),
    }))
}

/// Predict what leaves the agent wallet if this transaction lands.
/// Native value and recognized ERC20 transfers are reported, approvals
/// move nothing by themselves and opaque calls stay unreported.
pub fn extract_balance_changes(tx: &TxDao) -> Vec<BalanceChange> {
    let mut changes = Vec::new();
    if let Ok(val) = U256::from_dec_str(&tx.val) {
        if !val.is_zero() {
            changes.push(BalanceChange {
                token_addr: None,
                token_symbol: None,
                amount: val.to_string(),
                direction: BalanceChangeDirection::Out,
            });
        }
    }
    if let Some(call_data) = &tx.call_data {
        if let Ok(data) = hex::decode(call_data) {
            if let Some((_recipient, amount)) = decode_erc20_transfer(&data) {
                changes.push(BalanceChange {
                    token_addr: Some(tx.to_addr.clone()),
                    token_symbol: None,
                    amount: amount.to_string(),
                    direction: BalanceChangeDirection::Out,
                });
            } else if is_erc20_approve(&data) {
                // approvals grant spending rights without moving funds
            }
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{contract_encode, ERC20_CONTRACT_TEMPLATE};
    use crate::transaction::{create_erc20_transfer, create_native_transfer, create_transaction};
    use crate::model::TransactionRequest;
    use web3::types::Address;

    fn addr(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address::from(bytes)
    }

    #[test]
    fn test_native_transfer_outflow() {
        let tx = create_native_transfer("u", "s", addr(1), addr(2), 1, U256::from(123u64));
        let changes = extract_balance_changes(&tx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].token_addr, None);
        assert_eq!(changes[0].amount, "123");
        assert_eq!(changes[0].direction, BalanceChangeDirection::Out);
    }

    #[test]
    fn test_erc20_transfer_outflow() {
        let tx = create_erc20_transfer("u", "s", addr(1), addr(0xAA), addr(2), U256::from(777u64), 1)
            .unwrap();
        let changes = extract_balance_changes(&tx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].token_addr.as_deref(), Some(tx.to_addr.as_str()));
        assert_eq!(changes[0].amount, "777");
    }

    #[test]
    fn test_approve_and_opaque_calls_move_nothing() {
        let approve_data = hex::encode(
            contract_encode(&ERC20_CONTRACT_TEMPLATE, "approve", (addr(9), U256::from(1)))
                .unwrap(),
        );
        let request = TransactionRequest {
            chain_id: 1,
            from: addr(1),
            to: addr(0xAA),
            value: U256::zero(),
            call_data: Some(approve_data),
            gas_limit: None,
            max_fee_per_gas_cap: None,
            priority_fee_cap: None,
            gas_strategy: None,
            use_mev_protection: false,
        };
        let tx = create_transaction(&request, "u", "s", "approve spender");
        assert!(extract_balance_changes(&tx).is_empty());

        let opaque = TransactionRequest {
            call_data: Some("deadbeef00".to_string()),
            ..request
        };
        let tx = create_transaction(&opaque, "u", "s", "opaque call");
        assert!(extract_balance_changes(&tx).is_empty());
    }

    #[test]
    fn test_payable_call_with_opaque_data_reports_native_only() {
        let request = TransactionRequest {
            chain_id: 1,
            from: addr(1),
            to: addr(0xAA),
            value: U256::from(55u64),
            call_data: Some("deadbeef00".to_string()),
            gas_limit: None,
            max_fee_per_gas_cap: None,
            priority_fee_cap: None,
            gas_strategy: None,
            use_mev_protection: false,
        };
        let tx = create_transaction(&request, "u", "s", "payable call");
        let changes = extract_balance_changes(&tx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].token_addr, None);
        assert_eq!(changes[0].amount, "55");
    }
}
