use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use web3::types::{Address, U256};

/// Transaction as requested by an agent. Immutable once created, the
/// pipeline invocation that picked it up is its only owner.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub chain_id: i64,
    pub from: Address,
    pub to: Address,
    /// Native value in wei.
    pub value: U256,
    /// Hex encoded call data, without 0x prefix.
    pub call_data: Option<String>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas_cap: Option<U256>,
    pub priority_fee_cap: Option<U256>,
    pub gas_strategy: Option<GasStrategy>,
    pub use_mev_protection: bool,
}

#[derive(Serialize, Deserialize, sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GasStrategy {
    Slow,
    Standard,
    Fast,
}

impl Default for GasStrategy {
    fn default() -> Self {
        GasStrategy::Standard
    }
}

impl FromStr for GasStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slow" => Ok(GasStrategy::Slow),
            "standard" => Ok(GasStrategy::Standard),
            "fast" => Ok(GasStrategy::Fast),
            other => Err(format!("Unknown gas strategy: {}", other)),
        }
    }
}

impl Display for GasStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GasStrategy::Slow => write!(f, "slow"),
            GasStrategy::Standard => write!(f, "standard"),
            GasStrategy::Fast => write!(f, "fast"),
        }
    }
}

/// Fee bid computed by the gas optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasFeeEstimate {
    Eip1559 {
        max_fee_per_gas: U256,
        priority_fee: U256,
    },
    Legacy {
        gas_price: U256,
    },
}

/// Transaction lifecycle. Forward only, `Failed` and `Rejected` are
/// reachable from every non terminal state.
#[derive(Serialize, Deserialize, sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Simulated,
    Approved,
    Signed,
    Broadcast,
    Confirmed,
    Failed,
    Rejected,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Rejected
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TxStatus::Pending => 0,
            TxStatus::Simulated => 1,
            TxStatus::Approved => 2,
            TxStatus::Signed => 3,
            TxStatus::Broadcast => 4,
            TxStatus::Confirmed => 5,
            TxStatus::Failed => 6,
            TxStatus::Rejected => 7,
        }
    }

    /// A record only ever advances one step along the happy path or drops
    /// into a terminal failure state. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TxStatus::Failed | TxStatus::Rejected => true,
            TxStatus::Pending => false,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl Display for TxStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Simulated => "simulated",
            TxStatus::Approved => "approved",
            TxStatus::Signed => "signed",
            TxStatus::Broadcast => "broadcast",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "simulated" => Ok(TxStatus::Simulated),
            "approved" => Ok(TxStatus::Approved),
            "signed" => Ok(TxStatus::Signed),
            "broadcast" => Ok(TxStatus::Broadcast),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            "rejected" => Ok(TxStatus::Rejected),
            other => Err(format!("Unknown tx status: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BalanceChangeDirection {
    In,
    Out,
}

impl Display for BalanceChangeDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceChangeDirection::In => write!(f, "in"),
            BalanceChangeDirection::Out => write!(f, "out"),
        }
    }
}

impl FromStr for BalanceChangeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(BalanceChangeDirection::In),
            "out" => Ok(BalanceChangeDirection::Out),
            other => Err(format!("Unknown balance change direction: {}", other)),
        }
    }
}

/// One predicted asset movement, seen from the sender.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BalanceChange {
    /// None means the chain native asset.
    pub token_addr: Option<String>,
    pub token_symbol: Option<String>,
    /// Raw amount as decimal string, non negative, sign carried by direction.
    pub amount: String,
    pub direction: BalanceChangeDirection,
}

/// Outcome of a dry run. A revert or provider error is data here, not a
/// pipeline fault.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_estimated: Option<U256>,
    pub balance_changes: Vec<BalanceChange>,
    pub error: Option<String>,
    /// Opaque provider payload, kept for diagnostics only.
    pub raw: Option<serde_json::Value>,
}

impl SimulationResult {
    pub fn failed(error: &str) -> Self {
        SimulationResult {
            success: false,
            gas_estimated: None,
            balance_changes: vec![],
            error: Some(error.to_string()),
            raw: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GuardrailCheck {
    pub rule: String,
    pub passed: bool,
    pub message: String,
}

impl GuardrailCheck {
    pub fn pass(rule: &str, message: &str) -> Self {
        GuardrailCheck {
            rule: rule.to_string(),
            passed: true,
            message: message.to_string(),
        }
    }

    pub fn fail(rule: &str, message: &str) -> Self {
        GuardrailCheck {
            rule: rule.to_string(),
            passed: false,
            message: message.to_string(),
        }
    }
}

pub fn all_checks_passed(checks: &[GuardrailCheck]) -> bool {
    checks.iter().all(|c| c.passed)
}

/// Severity of one named risk dimension as reported by the data provider.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Warn,
    Block,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskDimension {
    pub name: String,
    pub severity: RiskSeverity,
    pub detail: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskClassification {
    Allow,
    Warn,
    Block,
    /// No static entry, no cached verdict and the provider could not be
    /// reached. Policy decides how this is treated.
    Unknown,
}

impl Display for RiskClassification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskClassification::Allow => "allow",
            RiskClassification::Warn => "warn",
            RiskClassification::Block => "block",
            RiskClassification::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Safety verdict for one (chain, address) pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContractRiskReport {
    pub chain_id: i64,
    pub address: String,
    pub dimensions: Vec<RiskDimension>,
    pub classification: RiskClassification,
}

impl ContractRiskReport {
    /// Deterministic worst-of rule: any block dimension wins, then warn,
    /// otherwise allow.
    pub fn aggregate(dimensions: &[RiskDimension]) -> RiskClassification {
        let worst = dimensions.iter().map(|d| d.severity).max();
        match worst {
            Some(RiskSeverity::Block) => RiskClassification::Block,
            Some(RiskSeverity::Warn) => RiskClassification::Warn,
            _ => RiskClassification::Allow,
        }
    }
}

/// Static admin override for a contract.
#[derive(Serialize, Deserialize, sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AllowlistAction {
    Allow,
    Deny,
}

impl FromStr for AllowlistAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(AllowlistAction::Allow),
            "deny" => Ok(AllowlistAction::Deny),
            other => Err(format!("Unknown list action: {}", other)),
        }
    }
}

/// Per user spending policy, read only to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLimits {
    pub max_per_tx_usd: rust_decimal::Decimal,
    pub max_daily_usd: rust_decimal::Decimal,
    pub cooldown_seconds: i64,
    pub max_slippage_bps: i64,
}

impl Default for UserLimits {
    fn default() -> Self {
        UserLimits {
            max_per_tx_usd: rust_decimal::Decimal::from(1000),
            max_daily_usd: rust_decimal::Decimal::from(5000),
            cooldown_seconds: 30,
            max_slippage_bps: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine_forward_only() {
        use TxStatus::*;
        let happy = [Pending, Simulated, Approved, Signed, Broadcast, Confirmed];
        for pair in happy.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        for from in happy.iter() {
            for to in happy.iter() {
                if to.rank() <= from.rank() {
                    assert!(!from.can_transition_to(*to), "{:?} -> {:?}", from, to);
                }
            }
        }
        for from in [Pending, Simulated, Approved, Signed, Broadcast] {
            assert!(from.can_transition_to(Failed));
            assert!(from.can_transition_to(Rejected));
        }
        for from in [Confirmed, Failed, Rejected] {
            for to in [Pending, Simulated, Broadcast, Confirmed, Failed, Rejected] {
                assert!(!from.can_transition_to(to), "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TxStatus::Pending,
            TxStatus::Simulated,
            TxStatus::Approved,
            TxStatus::Signed,
            TxStatus::Broadcast,
            TxStatus::Confirmed,
            TxStatus::Failed,
            TxStatus::Rejected,
        ] {
            assert_eq!(TxStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn test_worst_of_aggregation() {
        let dim = |name: &str, severity| RiskDimension {
            name: name.to_string(),
            severity,
            detail: None,
        };
        assert_eq!(
            ContractRiskReport::aggregate(&[]),
            RiskClassification::Allow
        );
        assert_eq!(
            ContractRiskReport::aggregate(&[dim("verified", RiskSeverity::Info)]),
            RiskClassification::Allow
        );
        assert_eq!(
            ContractRiskReport::aggregate(&[
                dim("verified", RiskSeverity::Info),
                dim("high-tax", RiskSeverity::Warn)
            ]),
            RiskClassification::Warn
        );
        assert_eq!(
            ContractRiskReport::aggregate(&[
                dim("high-tax", RiskSeverity::Warn),
                dim("honeypot", RiskSeverity::Block),
                dim("verified", RiskSeverity::Info)
            ]),
            RiskClassification::Block
        );
    }
}
