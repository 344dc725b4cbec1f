use crate::model::ContractRiskReport;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CachedEntry {
    report: ContractRiskReport,
    stored_at: Instant,
}

/// Verdict cache keyed by (chain, address). An expired entry behaves
/// exactly like a missing one.
pub struct RiskCache {
    ttl: Duration,
    entries: RwLock<HashMap<(i64, String), CachedEntry>>,
}

impl RiskCache {
    pub fn new(ttl: Duration) -> Self {
        RiskCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, chain_id: i64, address: &str) -> Option<ContractRiskReport> {
        let key = (chain_id, address.to_lowercase());
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.report.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // drop the stale entry so the map does not grow unbounded
        self.entries.write().await.remove(&key);
        None
    }

    pub async fn put(&self, report: ContractRiskReport) {
        let key = (report.chain_id, report.address.to_lowercase());
        self.entries.write().await.insert(
            key,
            CachedEntry {
                report,
                stored_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskClassification;

    fn report(chain_id: i64, address: &str) -> ContractRiskReport {
        ContractRiskReport {
            chain_id,
            address: address.to_string(),
            dimensions: vec![],
            classification: RiskClassification::Allow,
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = RiskCache::new(Duration::from_secs(60));
        cache.put(report(1, "0xabc")).await;
        assert!(cache.get(1, "0xABC").await.is_some());
        assert!(cache.get(5, "0xabc").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = RiskCache::new(Duration::from_secs(0));
        cache.put(report(1, "0xabc")).await;
        assert!(cache.get(1, "0xabc").await.is_none());
    }
}
