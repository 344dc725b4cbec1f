mod options;

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::web::Data;
use agent_tx_lib::config::Config;
use agent_tx_lib::contracts::encode_erc20_transfer;
use agent_tx_lib::db::create_sqlite_connection;
use agent_tx_lib::db::ops::{get_status_history, get_transaction_by_uid, upsert_contract_list_entry};
use agent_tx_lib::error::{CustomError, ErrorBag, ExecutorError};
use agent_tx_lib::events::EventBus;
use agent_tx_lib::model::{AllowlistAction, TransactionRequest};
use agent_tx_lib::runtime::{start_executor_engine, RuntimeOptions};
use agent_tx_lib::server::{run_server, ServerData};
use agent_tx_lib::service::submit_transaction_request;
use agent_tx_lib::setup::ExecutorSetup;
use agent_tx_lib::signer::LocalSigner;
use agent_tx_lib::{err_custom_create, err_from};
use serde::Deserialize;
use sqlx::SqliteConnection;
use web3::types::{Address, U256};

use crate::options::{validated_cli, ValidatedCommand, ValidatedTransfer};

fn db_filename_from_env() -> Result<String, ExecutorError> {
    env::var("DB_SQLITE_FILENAME")
        .map_err(|_| err_custom_create!("DB_SQLITE_FILENAME environment variable not set"))
}

async fn run_service(config: Config) -> Result<(), ExecutorError> {
    let signer = Arc::new(LocalSigner::from_env()?);
    let server_settings = config.server.clone();
    let runtime = start_executor_engine(None, signer, config).await?;

    match server_settings {
        Some(server_settings) if server_settings.enable => {
            let server_data = Data::new(Box::new(ServerData {
                shared_state: runtime.shared_state.clone(),
                db_connection: runtime.conn.clone(),
                setup: runtime.setup.clone(),
                event_bus: runtime.event_bus.clone(),
            }));
            run_server(server_data, &server_settings.listen_addr)
                .await
                .map_err(err_from!())?;
        }
        _ => {
            runtime
                .runtime_handle
                .await
                .map_err(|e| err_custom_create!("Service loop failed: {:?}", e))?;
        }
    }
    Ok(())
}

async fn run_transfer(transfer: ValidatedTransfer, config: Config) -> Result<(), ExecutorError> {
    let signer = LocalSigner::from_env()?;
    let from = signer
        .addresses()
        .into_iter()
        .next()
        .ok_or_else(|| err_custom_create!("No private keys loaded from ETH_PRIVATE_KEYS"))?;
    let from = Address::from_str(&from).map_err(err_from!())?;

    let setup = ExecutorSetup::new(&config, !transfer.keep_running)?;
    let db_filename = db_filename_from_env()?;

    // Queue everything before the engine starts so a non keep-running
    // loop cannot drain an empty database and exit early.
    {
        let mut conn = create_sqlite_connection(Some(&db_filename), true).await?;
        let event_bus = EventBus::default();
        for (receiver, amount) in transfer.receivers.iter().zip(transfer.amounts.iter()) {
            let (request, intent) = match transfer.token_addr {
                Some(token) => {
                    let call_data =
                        hex::encode(encode_erc20_transfer(*receiver, *amount).map_err(err_from!())?);
                    (
                        TransactionRequest {
                            chain_id: transfer.chain_id,
                            from,
                            to: token,
                            value: U256::zero(),
                            call_data: Some(call_data),
                            gas_limit: None,
                            max_fee_per_gas_cap: None,
                            priority_fee_cap: None,
                            gas_strategy: None,
                            use_mev_protection: transfer.use_mev_protection,
                        },
                        format!(
                            "Token transfer of {} units of {:#x} to {:#x}",
                            amount, token, receiver
                        ),
                    )
                }
                None => (
                    TransactionRequest {
                        chain_id: transfer.chain_id,
                        from,
                        to: *receiver,
                        value: *amount,
                        call_data: None,
                        gas_limit: None,
                        max_fee_per_gas_cap: None,
                        priority_fee_cap: None,
                        gas_strategy: None,
                        use_mev_protection: transfer.use_mev_protection,
                    },
                    format!("Native transfer of {} wei to {:#x}", amount, receiver),
                ),
            };
            submit_transaction_request(
                &mut conn,
                &setup,
                &event_bus,
                &request,
                &transfer.user_id,
                &transfer.skill,
                &intent,
            )
            .await?;
        }
    }

    let runtime = start_executor_engine(
        Some(RuntimeOptions {
            keep_running: transfer.keep_running,
            db_filename: Some(db_filename),
        }),
        Arc::new(signer),
        config,
    )
    .await?;
    runtime
        .runtime_handle
        .await
        .map_err(|e| err_custom_create!("Service loop failed: {:?}", e))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ContractListRow {
    address: String,
    action: String,
    note: Option<String>,
}

async fn import_contracts(
    conn: &mut SqliteConnection,
    chain_id: i64,
    file: &Path,
) -> Result<usize, ExecutorError> {
    let mut reader = csv::Reader::from_path(file)
        .map_err(|e| err_custom_create!("Cannot open import file {:?}: {}", file, e))?;
    let mut imported = 0;
    for row in reader.deserialize() {
        let row: ContractListRow =
            row.map_err(|e| err_custom_create!("Malformed row in import file: {}", e))?;
        let address = Address::from_str(&row.address)
            .map_err(|_| err_custom_create!("Invalid address in import file: {}", row.address))?;
        let action = AllowlistAction::from_str(&row.action)
            .map_err(|e| err_custom_create!("Invalid action in import file: {}", e))?;
        upsert_contract_list_entry(
            conn,
            chain_id,
            &format!("{:#x}", address),
            action,
            row.note.as_deref(),
        )
        .await
        .map_err(err_from!())?;
        imported += 1;
    }
    Ok(imported)
}

async fn show_tx(uid: &str) -> Result<(), ExecutorError> {
    let db_filename = db_filename_from_env()?;
    let mut conn = create_sqlite_connection(Some(&db_filename), true).await?;
    let tx = get_transaction_by_uid(&mut conn, uid)
        .await
        .map_err(err_from!())?
        .ok_or_else(|| err_custom_create!("No transaction found with uid {}", uid))?;
    let history = get_status_history(&mut conn, tx.id)
        .await
        .map_err(err_from!())?;
    let out = serde_json::json!({
        "tx": tx,
        "history": history,
    });
    println!("{}", serde_json::to_string_pretty(&out).map_err(err_from!())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ExecutorError> {
    if let Err(err) = dotenv::dotenv() {
        return Err(err_custom_create!("No .env file found: {}", err));
    }
    env_logger::init();
    let cli = validated_cli()?;
    let config = Config::load("config-executor.toml")?;

    match cli {
        ValidatedCommand::Run => run_service(config).await,
        ValidatedCommand::Transfer(transfer) => run_transfer(transfer, config).await,
        ValidatedCommand::ImportContracts { chain_id, file } => {
            let db_filename = db_filename_from_env()?;
            let mut conn = create_sqlite_connection(Some(&db_filename), true).await?;
            let imported = import_contracts(&mut conn, chain_id, &file).await?;
            log::info!(
                "Imported {} contract list entries for chain {}",
                imported,
                chain_id
            );
            Ok(())
        }
        ValidatedCommand::ShowTx { uid } => show_tx(&uid).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_tx_lib::db::ops::get_contract_list;
    use std::io::Write;

    fn write_csv(name: &str, rows: &[&str]) -> std::path::PathBuf {
        let file = env::temp_dir().join(format!("{}_{}.csv", name, std::process::id()));
        let mut out = std::fs::File::create(&file).unwrap();
        writeln!(out, "address,action,note").unwrap();
        for row in rows {
            writeln!(out, "{}", row).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_import_contracts_from_csv() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let file = write_csv(
            "agent_tx_import_ok",
            &[
                "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48,allow,usdc",
                "0x000000000000000000000000000000000000dEaD,deny,",
            ],
        );

        let imported = import_contracts(&mut conn, 1, &file).await.unwrap();
        assert_eq!(imported, 2);

        let entries = get_contract_list(&mut conn, Some(1)).await.unwrap();
        assert_eq!(entries.len(), 2);
        // addresses are normalized to lowercase on the way in
        assert_eq!(
            entries[0].address,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
        assert_eq!(entries[1].action, AllowlistAction::Deny);
        let _ = std::fs::remove_file(&file);
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_action() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let file = write_csv(
            "agent_tx_import_bad",
            &["0x000000000000000000000000000000000000dEaD,maybe,"],
        );

        let err = import_contracts(&mut conn, 1, &file).await.unwrap_err();
        assert!(err.to_string().contains("Invalid action"));
        assert!(get_contract_list(&mut conn, None).await.unwrap().is_empty());
        let _ = std::fs::remove_file(&file);
    }
}
