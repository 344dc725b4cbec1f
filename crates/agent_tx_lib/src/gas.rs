use crate::model::{GasFeeEstimate, GasStrategy};
use crate::setup::ChainSetup;

use crate::err_from;
use crate::error::ErrorBag;
use crate::error::ExecutorError;
use web3::transports::Http;
use web3::types::{BlockNumber, U256};
use web3::Web3;

/// Fees are floored to 0.1 gwei so bids stay stable across minor base
/// fee jitter.
pub const FEE_GRANULARITY_WEI: u64 = 100_000_000;

const FEE_HISTORY_BLOCKS: u64 = 10;
const REWARD_PERCENTILES: [f64; 3] = [25.0, 50.0, 75.0];

fn strategy_index(strategy: GasStrategy) -> usize {
    match strategy {
        GasStrategy::Slow => 0,
        GasStrategy::Standard => 1,
        GasStrategy::Fast => 2,
    }
}

/// Headroom over the current base fee: slow rides at 1.25x, standard
/// at 1.5x, fast at 2x so it survives several full blocks in a row.
fn base_fee_headroom(strategy: GasStrategy, base_fee: U256) -> U256 {
    match strategy {
        GasStrategy::Slow => base_fee * 5 / 4,
        GasStrategy::Standard => base_fee * 3 / 2,
        GasStrategy::Fast => base_fee * 2,
    }
}

fn legacy_headroom(strategy: GasStrategy, gas_price: U256) -> U256 {
    match strategy {
        GasStrategy::Slow => gas_price,
        GasStrategy::Standard => gas_price * 5 / 4,
        GasStrategy::Fast => gas_price * 3 / 2,
    }
}

pub fn floor_to_granularity(fee: U256) -> U256 {
    let gran = U256::from(FEE_GRANULARITY_WEI);
    if fee <= gran {
        return gran;
    }
    fee / gran * gran
}

fn median(mut values: Vec<U256>) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[values.len() / 2])
}

/// Median observed tip at the percentile matching the strategy. Empty
/// blocks report zero rewards and are ignored, with no usable signal
/// the chain default applies.
pub fn percentile_tip(rewards: &Option<Vec<Vec<U256>>>, idx: usize, fallback: U256) -> U256 {
    let Some(rewards) = rewards else {
        return fallback;
    };
    let observed: Vec<U256> = rewards
        .iter()
        .filter_map(|block| block.get(idx).copied())
        .filter(|tip| !tip.is_zero())
        .collect();
    median(observed).unwrap_or(fallback)
}

/// Clamp a raw bid to the chain ceiling and the caps the request
/// declared, then keep the tip below the total and floor both.
pub fn apply_limits(
    max_fee: U256,
    priority: U256,
    max_fee_cap: Option<U256>,
    priority_fee_cap: Option<U256>,
    chain_ceiling: U256,
) -> (U256, U256) {
    let mut max_fee = max_fee.min(chain_ceiling);
    if let Some(cap) = max_fee_cap {
        max_fee = max_fee.min(cap);
    }
    let mut priority = priority;
    if let Some(cap) = priority_fee_cap {
        priority = priority.min(cap);
    }
    priority = priority.min(max_fee);
    (floor_to_granularity(max_fee), floor_to_granularity(priority))
}

pub async fn estimate_fee(
    web3: &Web3<Http>,
    chain_setup: &ChainSetup,
    strategy: GasStrategy,
    max_fee_cap: Option<U256>,
    priority_fee_cap: Option<U256>,
) -> Result<GasFeeEstimate, ExecutorError> {
    if chain_setup.legacy_gas {
        let gas_price = web3.eth().gas_price().await.map_err(err_from!())?;
        let bid = legacy_headroom(strategy, gas_price);
        let (gas_price, _) = apply_limits(
            bid,
            U256::zero(),
            max_fee_cap,
            None,
            chain_setup.max_fee_per_gas,
        );
        return Ok(GasFeeEstimate::Legacy { gas_price });
    }

    let history = web3
        .eth()
        .fee_history(
            U256::from(FEE_HISTORY_BLOCKS),
            BlockNumber::Latest,
            Some(REWARD_PERCENTILES.to_vec()),
        )
        .await
        .map_err(err_from!())?;
    let base_fee = history
        .base_fee_per_gas
        .last()
        .copied()
        .unwrap_or(chain_setup.max_fee_per_gas);

    let tip = percentile_tip(
        &history.reward,
        strategy_index(strategy),
        chain_setup.priority_fee,
    );
    let raw_max_fee = base_fee_headroom(strategy, base_fee) + tip;
    let (max_fee_per_gas, priority_fee) = apply_limits(
        raw_max_fee,
        tip,
        max_fee_cap,
        priority_fee_cap,
        chain_setup.max_fee_per_gas,
    );
    Ok(GasFeeEstimate::Eip1559 {
        max_fee_per_gas,
        priority_fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::from(1_000_000_000u64)
    }

    #[test]
    fn test_floor_to_granularity() {
        assert_eq!(floor_to_granularity(U256::from(1_234_567_890u64)), U256::from(1_200_000_000u64));
        assert_eq!(floor_to_granularity(gwei(2)), gwei(2));
        // a tiny bid still lands on the minimum granule
        assert_eq!(floor_to_granularity(U256::from(7u64)), U256::from(FEE_GRANULARITY_WEI));
        assert_eq!(floor_to_granularity(U256::zero()), U256::from(FEE_GRANULARITY_WEI));
    }

    #[test]
    fn test_percentile_tip_ignores_empty_blocks() {
        let rewards = Some(vec![
            vec![U256::zero(), gwei(1), gwei(3)],
            vec![U256::zero(), U256::zero(), gwei(4)],
            vec![gwei(1), gwei(2), gwei(5)],
        ]);
        assert_eq!(percentile_tip(&rewards, 1, gwei(9)), gwei(2));
        // all observations empty at idx 0 except one
        assert_eq!(percentile_tip(&rewards, 0, gwei(9)), gwei(1));
        assert_eq!(percentile_tip(&None, 1, gwei(9)), gwei(9));
    }

    #[test]
    fn test_apply_limits_respects_caps_and_ceiling() {
        // chain ceiling wins over the raw bid
        let (max_fee, priority) =
            apply_limits(gwei(900), gwei(10), None, None, gwei(500));
        assert_eq!(max_fee, gwei(500));
        assert_eq!(priority, gwei(10));

        // request cap is tighter than the ceiling
        let (max_fee, _) =
            apply_limits(gwei(400), gwei(10), Some(gwei(200)), None, gwei(500));
        assert_eq!(max_fee, gwei(200));

        // priority never exceeds the total fee
        let (max_fee, priority) =
            apply_limits(gwei(50), gwei(80), None, None, gwei(500));
        assert_eq!(max_fee, gwei(50));
        assert_eq!(priority, gwei(50));

        let (_, priority) =
            apply_limits(gwei(100), gwei(30), None, Some(gwei(2)), gwei(500));
        assert_eq!(priority, gwei(2));
    }

    #[test]
    fn test_strategies_are_ordered() {
        let base_fee = gwei(40);
        let slow = base_fee_headroom(GasStrategy::Slow, base_fee);
        let standard = base_fee_headroom(GasStrategy::Standard, base_fee);
        let fast = base_fee_headroom(GasStrategy::Fast, base_fee);
        assert!(slow < standard && standard < fast);
        assert_eq!(slow, gwei(50));
        assert_eq!(standard, gwei(60));
        assert_eq!(fast, gwei(80));
    }
}
