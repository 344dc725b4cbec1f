use crate::error::{CustomError, ErrorBag, ExecutorError};
use crate::retry::RetryPolicy;
use crate::setup::ChainSetup;
use crate::{err_custom_create, err_from};
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use web3::types::H256;

pub const MEV_SUPPORTED_CHAIN_ID: i64 = 1;

/// Client for a private transaction relay. Transactions routed through it
/// skip the public mempool until they are included in a block.
pub struct MevRelay {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl MevRelay {
    pub fn new(request_timeout: Duration, retry: RetryPolicy) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(err_from!())?;
        Ok(MevRelay { client, retry })
    }

    /// Protected submission is only offered where a relay actually runs,
    /// currently Ethereum mainnet.
    pub fn is_supported(chain_setup: &ChainSetup) -> bool {
        chain_setup.chain_id == MEV_SUPPORTED_CHAIN_ID && chain_setup.mev_relay_url.is_some()
    }

    /// Submits a signed transaction to the relay. Returns the transaction
    /// hash on acceptance and None on any failure, the caller is expected
    /// to fall back to a public broadcast.
    pub async fn send_protected(&self, relay_url: &str, signed_raw: &[u8]) -> Option<H256> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendRawTransaction",
            "params": [format!("0x{}", hex::encode(signed_raw))],
        });
        let result = self
            .retry
            .call_when(|| self.post_transaction(relay_url, &payload), is_transient)
            .await;
        match result {
            Ok(tx_hash) => {
                log::info!("Relay accepted transaction {:#x}", tx_hash);
                Some(tx_hash)
            }
            Err(err) => {
                log::warn!("Relay submission to {} failed: {}", relay_url, err);
                None
            }
        }
    }

    async fn post_transaction(
        &self,
        relay_url: &str,
        payload: &serde_json::Value,
    ) -> Result<H256, ExecutorError> {
        let response = self
            .client
            .post(relay_url)
            .json(payload)
            .send()
            .await
            .map_err(err_from!())?
            .error_for_status()
            .map_err(err_from!())?;
        let body: serde_json::Value = response.json().await.map_err(err_from!())?;
        parse_relay_response(&body)
    }
}

// Transport and HTTP status problems are worth another attempt, a relay
// that answered with a rejection will keep rejecting the same payload.
fn is_transient(err: &ExecutorError) -> bool {
    matches!(err.inner, ErrorBag::ReqwestError(_))
}

/// JSON-RPC response from the relay. `result` carries the transaction hash,
/// `error.message` carries the rejection reason.
pub fn parse_relay_response(body: &serde_json::Value) -> Result<H256, ExecutorError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unspecified relay error");
        return Err(err_custom_create!(
            "Relay rejected transaction: {}",
            message
        ));
    }
    let tx_hash = body
        .get("result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| err_custom_create!("Relay response has no result field"))?;
    H256::from_str(tx_hash)
        .map_err(|_| err_custom_create!("Relay returned malformed transaction hash: {}", tx_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::test_helpers::chain_setup_for_tests;

    #[test]
    fn test_parse_relay_acceptance() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": "0x6a8e3d83c65af6f9837b62ff6e0b69152d0b78a4466c86bd1afa1a6a8e3d83c6"
        });
        let tx_hash = parse_relay_response(&body).unwrap();
        assert_eq!(
            format!("{:#x}", tx_hash),
            "0x6a8e3d83c65af6f9837b62ff6e0b69152d0b78a4466c86bd1afa1a6a8e3d83c6"
        );
    }

    #[test]
    fn test_parse_relay_rejection() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "transaction reverted during simulation"}
        });
        let err = parse_relay_response(&body).unwrap_err();
        assert!(err
            .to_string()
            .contains("transaction reverted during simulation"));
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_parse_relay_response_without_result() {
        let body = json!({"jsonrpc": "2.0", "id": 1});
        assert!(parse_relay_response(&body).is_err());
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1234"});
        assert!(parse_relay_response(&body).is_err());
    }

    #[test]
    fn test_relay_support_is_mainnet_only() {
        let mut mainnet = chain_setup_for_tests(1);
        mainnet.mev_relay_url = Some("https://rpc.flashbots.net".to_string());
        assert!(MevRelay::is_supported(&mainnet));

        // Same relay config on a side chain does not enable protection.
        let mut side_chain = chain_setup_for_tests(137);
        side_chain.mev_relay_url = Some("https://rpc.flashbots.net".to_string());
        assert!(!MevRelay::is_supported(&side_chain));

        // Mainnet without a configured relay endpoint falls back too.
        let mainnet_no_relay = chain_setup_for_tests(1);
        assert!(!MevRelay::is_supported(&mainnet_no_relay));
    }
}
