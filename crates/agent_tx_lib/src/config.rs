use serde::Deserialize;
use std::collections::btree_map::BTreeMap as Map;

use std::fs;
use std::path::Path;

use crate::error::ExecutorError;

use crate::error::CustomError;
use crate::error::ErrorBag;
use crate::{err_custom_create, err_from};
use web3::types::Address;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub chain: Map<String, Chain>,
    pub engine: Engine,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    pub server: Option<ServerSettings>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Chain {
    pub chain_id: i64,
    pub rpc_endpoints: Vec<String>,
    pub currency_symbol: String,
    pub priority_fee: f64,
    pub max_fee_per_gas: f64,
    #[serde(default)]
    pub legacy_gas: bool,
    pub confirmation_blocks: u64,
    pub transaction_timeout: u64,
    pub native_usd_price: f64,
    pub mev_relay_url: Option<String>,
    #[serde(default)]
    pub token: Map<String, Token>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u32,
    pub usd_price: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Engine {
    pub service_sleep: u64,
    pub process_sleep: u64,
    pub max_in_flight: usize,
    pub simulation_timeout: u64,
    pub broadcast_timeout: u64,
    pub confirmation_poll_interval: u64,
    pub confirmation_poll_attempts: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RiskSettings {
    pub provider_url: Option<String>,
    pub cache_ttl_seconds: u64,
    pub retry_max_attempts: u64,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    /// How to treat a contract the risk provider could not classify.
    /// Accepted values: "block", "warn".
    pub unknown_verdict: String,
    pub approve_on_warn: bool,
}

impl Default for RiskSettings {
    fn default() -> Self {
        RiskSettings {
            provider_url: None,
            cache_ttl_seconds: 3600,
            retry_max_attempts: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 10,
            unknown_verdict: "block".to_string(),
            approve_on_warn: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsSettings {
    pub max_per_tx_usd: f64,
    pub max_daily_usd: f64,
    pub cooldown_seconds: i64,
    pub max_slippage_bps: i64,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        LimitsSettings {
            max_per_tx_usd: 1000.0,
            max_daily_usd: 5000.0,
            cooldown_seconds: 30,
            max_slippage_bps: 100,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ServerSettings {
    pub enable: bool,
    pub listen_addr: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExecutorError> {
        match toml::from_slice(&fs::read(path).map_err(err_from!())?) {
            Ok(config) => Ok(config),
            Err(e) => Err(err_custom_create!("Failed to parse toml {:?}", e)),
        }
    }

    pub fn chain_by_id(&self, chain_id: i64) -> Option<&Chain> {
        self.chain.values().find(|c| c.chain_id == chain_id)
    }
}
