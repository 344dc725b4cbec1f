use crate::model::{ContractRiskReport, RiskDimension, RiskSeverity};

use crate::err_from;
use crate::error::ErrorBag;
use crate::error::ExecutorError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Upstream source of contract safety data.
#[async_trait]
pub trait RiskProvider: Send + Sync {
    async fn fetch_report(
        &self,
        chain_id: i64,
        address: &str,
    ) -> Result<ContractRiskReport, ExecutorError>;
}

#[derive(Deserialize, Debug)]
pub struct ProviderDimension {
    pub name: String,
    pub severity: String,
    pub detail: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ProviderResponse {
    pub dimensions: Vec<ProviderDimension>,
}

/// Provider labels vary between vendors, unrecognized ones land on warn
/// rather than being dropped.
fn parse_severity(s: &str) -> RiskSeverity {
    match s.to_lowercase().as_str() {
        "info" | "none" | "ok" | "low" => RiskSeverity::Info,
        "warn" | "warning" | "medium" => RiskSeverity::Warn,
        "block" | "critical" | "high" => RiskSeverity::Block,
        _ => RiskSeverity::Warn,
    }
}

pub fn response_to_report(
    chain_id: i64,
    address: &str,
    response: ProviderResponse,
) -> ContractRiskReport {
    let dimensions: Vec<RiskDimension> = response
        .dimensions
        .into_iter()
        .map(|d| RiskDimension {
            name: d.name,
            severity: parse_severity(&d.severity),
            detail: d.detail,
        })
        .collect();
    let classification = ContractRiskReport::aggregate(&dimensions);
    ContractRiskReport {
        chain_id,
        address: address.to_lowercase(),
        dimensions,
        classification,
    }
}

pub struct HttpRiskClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRiskClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(err_from!())?;
        Ok(HttpRiskClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RiskProvider for HttpRiskClient {
    async fn fetch_report(
        &self,
        chain_id: i64,
        address: &str,
    ) -> Result<ContractRiskReport, ExecutorError> {
        let url = format!(
            "{}/v1/contract/{}/{}",
            self.base_url,
            chain_id,
            address.to_lowercase()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(err_from!())?
            .error_for_status()
            .map_err(err_from!())?;
        let body: ProviderResponse = response.json().await.map_err(err_from!())?;
        Ok(response_to_report(chain_id, address, body))
    }
}
