use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use web3::types::U256;

#[derive(Debug, Clone)]
pub struct ConversionError {
    pub msg: String,
}

impl ConversionError {
    pub fn from(msg: String) -> Self {
        Self { msg }
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error during conversion: {}", self.msg)
    }
}

impl Error for ConversionError {}

pub fn gwei_to_u256(gwei: f64) -> Result<U256, ConversionError> {
    pub const GWEI: f64 = 1.0E9;
    if gwei < 0.0 {
        return Err(ConversionError {
            msg: "Gas price cannot be negative".to_string(),
        });
    }
    if gwei > 1.0E9 {
        return Err(ConversionError {
            msg: "Gas price cannot be greater than 1E9".to_string(),
        });
    }
    if gwei.is_nan() {
        return Err(ConversionError {
            msg: "Gas price cannot be NaN".to_string(),
        });
    }
    Ok(U256::from((gwei * GWEI) as u64))
}

/// Convert a raw chain amount into a Decimal shifted by the token decimals.
/// Values that do not fit into an i128 are out of Decimal range anyway.
pub fn u256_to_rust_dec(
    amount: U256,
    decimals: Option<u32>,
) -> Result<Decimal, ConversionError> {
    let decimals = decimals.unwrap_or(18);
    if decimals > 28 {
        return Err(ConversionError {
            msg: format!("Decimals out of range: {}", decimals),
        });
    }
    if amount > U256::from(i128::MAX as u128) {
        return Err(ConversionError {
            msg: format!("Amount too big to convert: {}", amount),
        });
    }
    Ok(Decimal::from_i128_with_scale(
        amount.as_u128() as i128,
        decimals,
    ))
}
