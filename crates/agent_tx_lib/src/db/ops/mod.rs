mod contract_list_ops;
mod guardrail_ops;
mod sim_ops;
mod tx_ops;
mod user_limits_ops;

pub use contract_list_ops::*;
pub use guardrail_ops::*;
pub use sim_ops::*;
pub use tx_ops::*;
pub use user_limits_ops::*;
