pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod eth;
pub mod events;
pub mod gas;
pub mod guardrails;
pub mod mev;
pub mod model;
pub mod nonce;
pub mod price;
pub mod process;
pub mod retry;
pub mod risk;
pub mod runtime;
pub mod server;
pub mod service;
pub mod setup;
pub mod signer;
pub mod simulate;
pub mod transaction;
pub mod utils;
