use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct CustomError {
    pub msg: String,
}

impl CustomError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for CustomError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl Error for CustomError {}

/// Error raised when a transaction cannot be driven any further and has to
/// be marked as failed in the log.
#[derive(Debug, Clone)]
pub struct TransactionFailedError {
    pub msg: String,
}

impl TransactionFailedError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for TransactionFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transaction failed: {}", self.msg)
    }
}

impl Error for TransactionFailedError {}
