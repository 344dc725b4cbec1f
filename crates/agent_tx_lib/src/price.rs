use crate::config::Config;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Source of USD prices used when valuing a transaction against
/// spending limits. Implementations must not panic on unknown assets.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn native_usd_price(&self, chain_id: i64) -> Option<Decimal>;
    async fn token_usd_price(&self, chain_id: i64, token_addr: &str) -> Option<Decimal>;
}

/// Fixed prices taken from the config file. Good enough for limit
/// enforcement on stable test networks, swap in a live feed for mainnet.
pub struct StaticPriceFeed {
    native: BTreeMap<i64, Decimal>,
    tokens: BTreeMap<(i64, String), Decimal>,
}

impl StaticPriceFeed {
    pub fn from_config(config: &Config) -> Self {
        let mut native = BTreeMap::new();
        let mut tokens = BTreeMap::new();
        for chain in config.chain.values() {
            if let Some(price) = Decimal::from_f64(chain.native_usd_price) {
                native.insert(chain.chain_id, price);
            }
            for token in chain.token.values() {
                if let Some(price) = Decimal::from_f64(token.usd_price) {
                    tokens.insert((chain.chain_id, format!("{:#x}", token.address)), price);
                }
            }
        }
        StaticPriceFeed { native, tokens }
    }

    pub fn single_chain(chain_id: i64, native_usd_price: Decimal) -> Self {
        let mut native = BTreeMap::new();
        native.insert(chain_id, native_usd_price);
        StaticPriceFeed {
            native,
            tokens: BTreeMap::new(),
        }
    }

    pub fn add_token_price(&mut self, chain_id: i64, token_addr: &str, usd_price: Decimal) {
        self.tokens
            .insert((chain_id, token_addr.to_lowercase()), usd_price);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn native_usd_price(&self, chain_id: i64) -> Option<Decimal> {
        self.native.get(&chain_id).copied()
    }

    async fn token_usd_price(&self, chain_id: i64, token_addr: &str) -> Option<Decimal> {
        self.tokens
            .get(&(chain_id, token_addr.to_lowercase()))
            .copied()
    }
}
