use super::custom::{CustomError, TransactionFailedError};
use crate::utils::ConversionError;
use thiserror::Error;
use web3::ethabi::ethereum_types::FromDecStrErr;

/// All low level errors that the engine can run into, gathered in one enum
/// so they can be wrapped with call-site context.
#[derive(Error, Debug)]
pub enum ErrorBag {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Hex conversion error: {0}")]
    HexError(#[from] rustc_hex::FromHexError),
    #[error("Dec conversion error: {0}")]
    DecError(#[from] FromDecStrErr),
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("sqlx migrate error: {0}")]
    SqlxMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("conversion error: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("web3 error: {0}")]
    Web3Error(#[from] web3::Error),
    #[error("web3 abi error: {0}")]
    Web3AbiError(#[from] web3::ethabi::Error),
    #[error("http error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("decimal error: {0}")]
    DecimalError(#[from] rust_decimal::Error),
    #[error("{0}")]
    TransactionFailedError(#[from] TransactionFailedError),
    #[error("{0}")]
    CustomError(#[from] CustomError),
}
