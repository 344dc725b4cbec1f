use crate::contracts::encode_erc20_transfer;
use crate::db::model::TxDao;
use crate::model::{TransactionRequest, TxStatus};

use crate::error::ExecutorError;
use crate::error::{CustomError, ErrorBag};
use crate::{err_custom_create, err_from};
use std::str::FromStr;
use uuid::Uuid;
use web3::transports::Http;
use web3::types::{Address, Bytes, CallRequest, TransactionParameters, U256, U64};
use web3::Web3;

fn decode_data_to_bytes(tx: &TxDao) -> Result<Option<Bytes>, ExecutorError> {
    Ok(if let Some(data) = &tx.call_data {
        let hex_data = hex::decode(data)
            .map_err(|_err| err_custom_create!("Failed to convert data from hex"))?;
        Some(Bytes(hex_data))
    } else {
        None
    })
}

/// Call request used for gas estimation and simulation. Fee fields may
/// still be unset at this point, the node fills in reasonable values.
pub fn dao_to_call_request(tx: &TxDao) -> Result<CallRequest, ExecutorError> {
    let max_fee_per_gas = tx
        .max_fee_per_gas
        .as_ref()
        .map(|f| U256::from_dec_str(f))
        .transpose()
        .map_err(err_from!())?;
    let priority_fee = tx
        .priority_fee
        .as_ref()
        .map(|f| U256::from_dec_str(f))
        .transpose()
        .map_err(err_from!())?;
    Ok(CallRequest {
        from: Some(Address::from_str(&tx.from_addr).map_err(err_from!())?),
        to: Some(Address::from_str(&tx.to_addr).map_err(err_from!())?),
        gas: tx.gas_limit.map(|g| U256::from(g as u64)),
        gas_price: None,
        value: Some(U256::from_dec_str(&tx.val).map_err(err_from!())?),
        data: decode_data_to_bytes(tx)?,
        transaction_type: max_fee_per_gas.map(|_| U64::from(2)),
        access_list: None,
        max_fee_per_gas,
        max_priority_fee_per_gas: priority_fee,
    })
}

/// Parameters handed to the signer. Requires nonce, gas limit and fees
/// to be resolved. For legacy chains both stored fee columns hold the
/// same gas price and the transaction is emitted as type 0.
pub fn dao_to_transaction(tx: &TxDao, legacy: bool) -> Result<TransactionParameters, ExecutorError> {
    let max_fee_per_gas = U256::from_dec_str(
        tx.max_fee_per_gas
            .as_ref()
            .ok_or_else(|| err_custom_create!("Missing max fee per gas"))?,
    )
    .map_err(err_from!())?;
    let priority_fee = U256::from_dec_str(
        tx.priority_fee
            .as_ref()
            .ok_or_else(|| err_custom_create!("Missing priority fee"))?,
    )
    .map_err(err_from!())?;
    let gas_limit = tx
        .gas_limit
        .ok_or_else(|| err_custom_create!("Missing gas limit"))?;

    Ok(TransactionParameters {
        nonce: Some(U256::from(
            tx.nonce.ok_or_else(|| err_custom_create!("Missing nonce"))?,
        )),
        to: Some(Address::from_str(&tx.to_addr).map_err(err_from!())?),
        gas: U256::from(gas_limit as u64),
        gas_price: if legacy { Some(max_fee_per_gas) } else { None },
        value: U256::from_dec_str(&tx.val).map_err(err_from!())?,
        data: decode_data_to_bytes(tx)?.unwrap_or_default(),
        chain_id: Some(tx.chain_id as u64),
        transaction_type: if legacy { None } else { Some(U64::from(2)) },
        access_list: None,
        max_fee_per_gas: if legacy { None } else { Some(max_fee_per_gas) },
        max_priority_fee_per_gas: if legacy { None } else { Some(priority_fee) },
    })
}

/// Map an accepted request onto a fresh queue entry. Everything the
/// pipeline resolves later (nonce, fees, hashes) starts out empty.
pub fn create_transaction(
    request: &TransactionRequest,
    user_id: &str,
    skill: &str,
    intent: &str,
) -> TxDao {
    TxDao {
        id: 0,
        uid: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        skill: skill.to_string(),
        intent: intent.to_string(),
        chain_id: request.chain_id,
        from_addr: format!("{:#x}", request.from),
        to_addr: format!("{:#x}", request.to),
        val: request.value.to_string(),
        val_usd: None,
        call_data: request.call_data.clone(),
        gas_limit: request.gas_limit.map(|g| g as i64),
        max_fee_per_gas: None,
        priority_fee: None,
        max_fee_cap: request.max_fee_per_gas_cap.map(|c| c.to_string()),
        priority_fee_cap: request.priority_fee_cap.map(|c| c.to_string()),
        gas_strategy: request.gas_strategy.unwrap_or_default(),
        use_mev_protection: request.use_mev_protection,
        mev_relay_used: false,
        nonce: None,
        status: TxStatus::Pending,
        tx_hash: None,
        signed_raw_data: None,
        signed_date: None,
        broadcast_date: None,
        broadcast_count: 0,
        confirm_date: None,
        block_number: None,
        gas_used: None,
        effective_gas_price: None,
        fee_paid: None,
        error: None,
        created_date: chrono::Utc::now(),
        updated_date: chrono::Utc::now(),
        first_processed: None,
    }
}

pub fn create_native_transfer(
    user_id: &str,
    skill: &str,
    from: Address,
    to: Address,
    chain_id: i64,
    amount: U256,
) -> TxDao {
    let request = TransactionRequest {
        chain_id,
        from,
        to,
        value: amount,
        call_data: None,
        gas_limit: None,
        max_fee_per_gas_cap: None,
        priority_fee_cap: None,
        gas_strategy: None,
        use_mev_protection: false,
    };
    let intent = format!("Native transfer of {} wei to {:#x}", amount, to);
    create_transaction(&request, user_id, skill, &intent)
}

pub fn create_erc20_transfer(
    user_id: &str,
    skill: &str,
    from: Address,
    token: Address,
    erc20_to: Address,
    erc20_amount: U256,
    chain_id: i64,
) -> Result<TxDao, ExecutorError> {
    let call_data = hex::encode(encode_erc20_transfer(erc20_to, erc20_amount).map_err(err_from!())?);
    let request = TransactionRequest {
        chain_id,
        from,
        to: token,
        value: U256::zero(),
        call_data: Some(call_data),
        gas_limit: None,
        max_fee_per_gas_cap: None,
        priority_fee_cap: None,
        gas_strategy: None,
        use_mev_protection: false,
    };
    let intent = format!(
        "Token transfer of {} units of {:#x} to {:#x}",
        erc20_amount, token, erc20_to
    );
    Ok(create_transaction(&request, user_id, skill, &intent))
}

/// Look up the receipt for a broadcast transaction. Returns None while
/// the transaction is still absent from a block. On success fills in
/// the on-chain outcome fields and reports whether execution succeeded.
pub async fn find_receipt(
    web3: &Web3<Http>,
    tx: &mut TxDao,
) -> Result<Option<bool>, ExecutorError> {
    let tx_hash = tx
        .tx_hash
        .as_ref()
        .ok_or_else(|| err_custom_create!("No tx hash"))?;
    let tx_hash = web3::types::H256::from_str(tx_hash)
        .map_err(|_err| err_custom_create!("Cannot parse tx_hash"))?;
    let receipt = web3
        .eth()
        .transaction_receipt(tx_hash)
        .await
        .map_err(err_from!())?;
    if let Some(receipt) = receipt {
        tx.block_number = receipt.block_number.map(|x| x.as_u64() as i64);
        let gas_used = receipt
            .gas_used
            .ok_or_else(|| err_custom_create!("Gas used expected"))?;
        let effective_gas_price = receipt
            .effective_gas_price
            .ok_or_else(|| err_custom_create!("Effective gas price expected"))?;
        tx.gas_used = Some(gas_used.to_string());
        tx.effective_gas_price = Some(effective_gas_price.to_string());
        tx.fee_paid = Some((gas_used * effective_gas_price).to_string());
        let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        Ok(Some(success))
    } else {
        tx.block_number = None;
        tx.gas_used = None;
        tx.effective_gas_price = None;
        tx.fee_paid = None;
        Ok(None)
    }
}
