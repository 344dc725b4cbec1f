mod cache;
mod client;

pub use cache::RiskCache;
pub use client::{response_to_report, HttpRiskClient, RiskProvider};

use crate::config::RiskSettings;
use crate::db::ops::get_contract_list_entry;
use crate::model::{
    AllowlistAction, ContractRiskReport, RiskClassification, RiskDimension, RiskSeverity,
};
use crate::retry::RetryPolicy;

use crate::err_from;
use crate::error::ErrorBag;
use crate::error::ExecutorError;
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;

/// Safety verdicts with a fixed lookup order: the static admin list is
/// authoritative, then the cache, then the external provider behind a
/// bounded retry. When all of that fails the verdict is an explicit
/// Unknown, never a silent pass.
pub struct RiskEngine {
    cache: RiskCache,
    provider: Option<Arc<dyn RiskProvider>>,
    retry: RetryPolicy,
}

impl RiskEngine {
    pub fn new(settings: &RiskSettings) -> Result<Self, ExecutorError> {
        let provider: Option<Arc<dyn RiskProvider>> = match &settings.provider_url {
            Some(url) => Some(Arc::new(HttpRiskClient::new(
                url,
                Duration::from_secs(settings.request_timeout_secs),
            )?)),
            None => None,
        };
        Ok(RiskEngine {
            cache: RiskCache::new(Duration::from_secs(settings.cache_ttl_seconds)),
            provider,
            retry: RetryPolicy::new(settings.retry_max_attempts, settings.retry_backoff_ms),
        })
    }

    pub fn with_provider(
        cache_ttl: Duration,
        provider: Arc<dyn RiskProvider>,
        retry: RetryPolicy,
    ) -> Self {
        RiskEngine {
            cache: RiskCache::new(cache_ttl),
            provider: Some(provider),
            retry,
        }
    }

    pub async fn assess(
        &self,
        conn: &mut SqliteConnection,
        chain_id: i64,
        address: &str,
    ) -> Result<ContractRiskReport, ExecutorError> {
        if let Some(entry) = get_contract_list_entry(conn, chain_id, address)
            .await
            .map_err(err_from!())?
        {
            return Ok(static_list_report(chain_id, address, entry.action, entry.note));
        }

        if let Some(hit) = self.cache.get(chain_id, address).await {
            return Ok(hit);
        }

        let Some(provider) = &self.provider else {
            log::debug!("No risk provider configured, {} stays unknown", address);
            return Ok(unknown_report(chain_id, address));
        };

        match self
            .retry
            .call(|| provider.fetch_report(chain_id, address))
            .await
        {
            Ok(report) => {
                self.cache.put(report.clone()).await;
                Ok(report)
            }
            Err(e) => {
                log::warn!(
                    "Risk provider unreachable for {} on chain {}: {}",
                    address,
                    chain_id,
                    e
                );
                Ok(unknown_report(chain_id, address))
            }
        }
    }
}

fn static_list_report(
    chain_id: i64,
    address: &str,
    action: AllowlistAction,
    note: Option<String>,
) -> ContractRiskReport {
    let (severity, classification, name) = match action {
        AllowlistAction::Allow => (RiskSeverity::Info, RiskClassification::Allow, "static-allow"),
        AllowlistAction::Deny => (RiskSeverity::Block, RiskClassification::Block, "static-deny"),
    };
    ContractRiskReport {
        chain_id,
        address: address.to_lowercase(),
        dimensions: vec![RiskDimension {
            name: name.to_string(),
            severity,
            detail: note,
        }],
        classification,
    }
}

fn unknown_report(chain_id: i64, address: &str) -> ContractRiskReport {
    ContractRiskReport {
        chain_id,
        address: address.to_lowercase(),
        dimensions: vec![],
        classification: RiskClassification::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;
    use crate::db::ops::upsert_contract_list_entry;
    use crate::err_custom_create;
    use crate::error::CustomError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingProvider {
        calls: AtomicU64,
        fail_first: u64,
        classification: RiskClassification,
    }

    impl CountingProvider {
        fn new(fail_first: u64, classification: RiskClassification) -> Self {
            CountingProvider {
                calls: AtomicU64::new(0),
                fail_first,
                classification,
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RiskProvider for CountingProvider {
        async fn fetch_report(
            &self,
            chain_id: i64,
            address: &str,
        ) -> Result<ContractRiskReport, ExecutorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(err_custom_create!("provider down, call {}", n));
            }
            Ok(ContractRiskReport {
                chain_id,
                address: address.to_lowercase(),
                dimensions: vec![],
                classification: self.classification,
            })
        }
    }

    fn engine(provider: Arc<CountingProvider>, ttl_secs: u64) -> RiskEngine {
        RiskEngine::with_provider(
            Duration::from_secs(ttl_secs),
            provider,
            RetryPolicy::new(2, 1),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_suppresses_provider_call() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let provider = Arc::new(CountingProvider::new(0, RiskClassification::Allow));
        let engine = engine(provider.clone(), 600);

        let first = engine.assess(&mut conn, 1, "0xAA").await.unwrap();
        assert_eq!(first.classification, RiskClassification::Allow);
        assert_eq!(provider.calls(), 1);

        let second = engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(second.classification, RiskClassification::Allow);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_calls_provider_again() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let provider = Arc::new(CountingProvider::new(0, RiskClassification::Warn));
        let engine = engine(provider.clone(), 0);

        engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_outage_yields_unknown_after_bounded_retries() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let provider = Arc::new(CountingProvider::new(u64::MAX, RiskClassification::Allow));
        let engine = engine(provider.clone(), 600);

        let report = engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(report.classification, RiskClassification::Unknown);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_and_caches() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let provider = Arc::new(CountingProvider::new(1, RiskClassification::Allow));
        let engine = engine(provider.clone(), 600);

        let report = engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(report.classification, RiskClassification::Allow);
        assert_eq!(provider.calls(), 2);

        engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_static_deny_short_circuits_provider() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        upsert_contract_list_entry(&mut conn, 1, "0xAA", AllowlistAction::Deny, Some("scam"))
            .await
            .unwrap();
        let provider = Arc::new(CountingProvider::new(0, RiskClassification::Allow));
        let engine = engine(provider.clone(), 600);

        let report = engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(report.classification, RiskClassification::Block);
        assert_eq!(report.dimensions[0].name, "static-deny");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_provider_configured_yields_unknown() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let engine = RiskEngine::new(&RiskSettings::default()).unwrap();
        let report = engine.assess(&mut conn, 1, "0xaa").await.unwrap();
        assert_eq!(report.classification, RiskClassification::Unknown);
    }
}
