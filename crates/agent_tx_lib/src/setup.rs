use crate::config::Config;
use crate::error::ExecutorError;
use crate::error::{CustomError, ErrorBag};
use crate::utils::gwei_to_u256;
use crate::{err_custom_create, err_from};
use rand::Rng;
use std::collections::BTreeMap;
use web3::transports::Http;
use web3::types::{Address, U256};
use web3::Web3;

#[derive(Clone, Debug)]
pub struct ProviderSetup {
    pub provider: Web3<Http>,
    pub number_of_calls: u64,
}

#[derive(Clone, Debug)]
pub struct TokenSetup {
    pub address: Address,
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Clone, Debug)]
pub struct ChainSetup {
    pub chain_id: i64,
    pub providers: Vec<ProviderSetup>,
    pub currency_symbol: String,
    pub max_fee_per_gas: U256,
    pub priority_fee: U256,
    pub legacy_gas: bool,
    pub confirmation_blocks: u64,
    pub transaction_timeout: u64,
    pub mev_relay_url: Option<String>,
    /// Known tokens keyed by lowercase 0x address.
    pub tokens: BTreeMap<String, TokenSetup>,
}

impl ChainSetup {
    pub fn token_by_address(&self, addr: &str) -> Option<&TokenSetup> {
        self.tokens.get(&addr.to_lowercase())
    }
}

#[derive(Clone, Debug)]
pub struct ExecutorSetup {
    pub chain_setup: BTreeMap<i64, ChainSetup>,
    pub finish_when_done: bool,
    pub service_sleep: u64,
    pub process_sleep: u64,
    pub max_in_flight: usize,
    pub simulation_timeout: u64,
    pub broadcast_timeout: u64,
    pub confirmation_poll_interval: u64,
    pub confirmation_poll_attempts: u64,
}

impl ExecutorSetup {
    pub fn new(config: &Config, finish_when_done: bool) -> Result<Self, ExecutorError> {
        let mut es = ExecutorSetup {
            chain_setup: BTreeMap::new(),
            finish_when_done,
            service_sleep: config.engine.service_sleep,
            process_sleep: config.engine.process_sleep,
            max_in_flight: config.engine.max_in_flight,
            simulation_timeout: config.engine.simulation_timeout,
            broadcast_timeout: config.engine.broadcast_timeout,
            confirmation_poll_interval: config.engine.confirmation_poll_interval,
            confirmation_poll_attempts: config.engine.confirmation_poll_attempts,
        };
        for (chain_name, chain_config) in &config.chain {
            let mut providers = Vec::new();
            for endp in &chain_config.rpc_endpoints {
                let Ok(transport) = web3::transports::Http::new(endp) else {
                    return Err(err_custom_create!(
                        "Failed to create transport for endpoint: {}",
                        endp
                    ));
                };
                let provider = Web3::new(transport);
                providers.push(ProviderSetup {
                    provider,
                    number_of_calls: 0,
                });
            }
            if providers.is_empty() {
                return Err(err_custom_create!(
                    "No rpc endpoints configured for chain {}",
                    chain_name
                ));
            }
            let mut tokens = BTreeMap::new();
            for token in chain_config.token.values() {
                tokens.insert(
                    format!("{:#x}", token.address),
                    TokenSetup {
                        address: token.address,
                        symbol: token.symbol.clone(),
                        decimals: token.decimals,
                    },
                );
            }
            es.chain_setup.insert(
                chain_config.chain_id,
                ChainSetup {
                    chain_id: chain_config.chain_id,
                    providers,
                    currency_symbol: chain_config.currency_symbol.clone(),
                    max_fee_per_gas: gwei_to_u256(chain_config.max_fee_per_gas)
                        .map_err(err_from!())?,
                    priority_fee: gwei_to_u256(chain_config.priority_fee).map_err(err_from!())?,
                    legacy_gas: chain_config.legacy_gas,
                    confirmation_blocks: chain_config.confirmation_blocks,
                    transaction_timeout: chain_config.transaction_timeout,
                    mev_relay_url: chain_config.mev_relay_url.clone(),
                    tokens,
                },
            );
        }
        Ok(es)
    }

    pub fn get_chain_setup(&self, chain_id: i64) -> Result<&ChainSetup, ExecutorError> {
        self.chain_setup
            .get(&chain_id)
            .ok_or_else(|| err_custom_create!("No chain setup for chain id: {}", chain_id))
    }

    pub fn get_provider(&self, chain_id: i64) -> Result<&Web3<Http>, ExecutorError> {
        let chain_setup = self
            .chain_setup
            .get(&chain_id)
            .ok_or_else(|| err_custom_create!("No chain setup for chain id: {}", chain_id))?;

        let mut rng = rand::thread_rng();
        let provider = chain_setup
            .providers
            .get(rng.gen_range(0..chain_setup.providers.len()))
            .ok_or_else(|| err_custom_create!("No providers found for chain id: {}", chain_id))?;
        Ok(&provider.provider)
    }
}
