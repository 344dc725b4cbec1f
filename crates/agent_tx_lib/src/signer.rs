use crate::db::model::TxDao;
use crate::error::{CustomError, ErrorBag, ExecutorError};
use crate::eth::get_eth_addr_from_secret;
use crate::transaction::dao_to_transaction;
use crate::{err_custom_create, err_from};
use async_trait::async_trait;
use secp256k1::SecretKey;
use std::collections::BTreeMap;
use std::str::FromStr;
use web3::transports::Http;
use web3::types::{Address, TransactionParameters, H256};
use web3::Web3;

/// Raw signed transaction together with the hash it will be known by.
pub struct SignedPayload {
    pub raw: Vec<u8>,
    pub tx_hash: H256,
}

/// Signing authority for outgoing transactions. The engine hands fully
/// resolved parameters to whatever implements this trait, so key custody
/// can live outside the process.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(
        &self,
        web3: &Web3<Http>,
        from: Address,
        tx: TransactionParameters,
    ) -> Result<SignedPayload, ExecutorError>;
}

/// In-process signer over secp256k1 keys loaded at startup. Keys are
/// indexed by the address derived from them, a row whose from address
/// has no loaded key fails to sign.
pub struct LocalSigner {
    keys: BTreeMap<String, SecretKey>,
}

impl LocalSigner {
    pub fn new(secret_keys: Vec<SecretKey>) -> Self {
        let mut keys = BTreeMap::new();
        for secret_key in secret_keys {
            let public_addr = get_eth_addr_from_secret(&secret_key);
            keys.insert(format!("{:#x}", public_addr), secret_key);
        }
        LocalSigner { keys }
    }

    /// Reads comma separated hex keys from ETH_PRIVATE_KEYS.
    pub fn from_env() -> Result<Self, ExecutorError> {
        let raw = std::env::var("ETH_PRIVATE_KEYS")
            .map_err(|_| err_custom_create!("Missing ETH_PRIVATE_KEYS env variable"))?;
        let mut secret_keys = Vec::new();
        for key_str in raw.split(',') {
            let secret_key = SecretKey::from_str(key_str.trim())
                .map_err(|_| err_custom_create!("Failed to parse private key"))?;
            secret_keys.push(secret_key);
        }
        if secret_keys.is_empty() {
            return Err(err_custom_create!("ETH_PRIVATE_KEYS is empty"));
        }
        Ok(LocalSigner::new(secret_keys))
    }

    pub fn addresses(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    async fn sign(
        &self,
        web3: &Web3<Http>,
        from: Address,
        tx: TransactionParameters,
    ) -> Result<SignedPayload, ExecutorError> {
        let secret_key = self
            .keys
            .get(&format!("{:#x}", from))
            .ok_or_else(|| err_custom_create!("No key loaded for address {:#x}", from))?;
        // Signing happens offline, all parameters are already resolved.
        let signed = web3
            .accounts()
            .sign_transaction(tx, secret_key)
            .await
            .map_err(err_from!())?;
        Ok(SignedPayload {
            raw: signed.raw_transaction.0,
            tx_hash: signed.transaction_hash,
        })
    }
}

/// Signs a queue entry in place, filling signed_raw_data, signed_date
/// and tx_hash.
pub async fn sign_tx_dao(
    web3: &Web3<Http>,
    tx: &mut TxDao,
    signer: &dyn TransactionSigner,
    legacy: bool,
) -> Result<(), ExecutorError> {
    let from_addr = Address::from_str(&tx.from_addr).map_err(err_from!())?;
    let tx_object = dao_to_transaction(tx, legacy)?;
    log::debug!("Signing transaction: {:#?}", tx_object);
    let signed = signer.sign(web3, from_addr, tx_object).await?;
    tx.signed_raw_data = Some(hex::encode(&signed.raw));
    tx.signed_date = Some(chrono::Utc::now());
    tx.tx_hash = Some(format!("{:#x}", signed.tx_hash));
    Ok(())
}
