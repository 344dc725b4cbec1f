use crate::eth::get_transaction_count;

use crate::err_from;
use crate::error::ErrorBag;
use crate::error::ExecutorError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use web3::transports::Http;
use web3::types::Address;
use web3::Web3;

/// Broadcast rejections that prove the node never accepted the
/// transaction into its pool. Only these make a nonce safe to reuse.
const NOT_POOLED_REJECTIONS: [&str; 6] = [
    "insufficient funds",
    "intrinsic gas too low",
    "exceeds block gas limit",
    "oversized data",
    "invalid sender",
    "max fee per gas less than block base fee",
];

pub fn rejection_proves_not_pooled(err_msg: &str) -> bool {
    let msg = err_msg.to_lowercase();
    NOT_POOLED_REJECTIONS.iter().any(|pat| msg.contains(pat))
}

/// Hands out strictly increasing nonces per (account, chain). The first
/// reservation seeds from the pending transaction count so restarts and
/// externally submitted transactions are accounted for.
pub struct NonceManager {
    slots: Mutex<HashMap<(Address, i64), Arc<Mutex<Option<u64>>>>>,
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceManager {
    pub fn new() -> Self {
        NonceManager {
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, account: Address, chain_id: i64) -> Arc<Mutex<Option<u64>>> {
        self.slots
            .lock()
            .await
            .entry((account, chain_id))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Reserve the next nonce. The per-key lock is held across seeding
    /// so concurrent first reservations cannot double-seed.
    pub async fn reserve(
        &self,
        web3: &Web3<Http>,
        account: Address,
        chain_id: i64,
    ) -> Result<u64, ExecutorError> {
        let slot = self.slot(account, chain_id).await;
        let mut guard = slot.lock().await;
        let next = match *guard {
            Some(n) => n,
            None => get_transaction_count(account, web3, true)
                .await
                .map_err(err_from!())?,
        };
        *guard = Some(next + 1);
        Ok(next)
    }

    /// Return a nonce that provably never reached the pool. Succeeds
    /// only for the most recently issued nonce, anything older would
    /// tear a hole into the sequence.
    pub async fn release(&self, account: Address, chain_id: i64, nonce: u64) -> bool {
        let slot = self.slot(account, chain_id).await;
        let mut guard = slot.lock().await;
        if *guard == Some(nonce + 1) {
            *guard = Some(nonce);
            true
        } else {
            false
        }
    }

    /// Forget the local sequence, the next reservation re-seeds from
    /// the node. Used after nonce-related broadcast errors.
    pub async fn resync(&self, account: Address, chain_id: i64) {
        let slot = self.slot(account, chain_id).await;
        *slot.lock().await = None;
    }

    pub async fn seed(&self, account: Address, chain_id: i64, next_nonce: u64) {
        let slot = self.slot(account, chain_id).await;
        *slot.lock().await = Some(next_nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_web3() -> Web3<Http> {
        Web3::new(Http::new("http://noconn").unwrap())
    }

    fn account() -> Address {
        Address::from_low_u64_be(0xbeef)
    }

    #[tokio::test]
    async fn test_concurrent_reservations_are_unique() {
        let manager = Arc::new(NonceManager::new());
        manager.seed(account(), 1, 100).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let web3 = dummy_web3();
                manager.reserve(&web3, account(), 1).await.unwrap()
            }));
        }
        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (100..120).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_chains_and_accounts_are_independent() {
        let manager = NonceManager::new();
        let web3 = dummy_web3();
        manager.seed(account(), 1, 5).await;
        manager.seed(account(), 137, 40).await;

        assert_eq!(manager.reserve(&web3, account(), 1).await.unwrap(), 5);
        assert_eq!(manager.reserve(&web3, account(), 137).await.unwrap(), 40);
        assert_eq!(manager.reserve(&web3, account(), 1).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_release_only_most_recent() {
        let manager = NonceManager::new();
        let web3 = dummy_web3();
        manager.seed(account(), 1, 10).await;

        let a = manager.reserve(&web3, account(), 1).await.unwrap();
        let b = manager.reserve(&web3, account(), 1).await.unwrap();
        assert_eq!((a, b), (10, 11));

        // releasing an older nonce would tear the sequence
        assert!(!manager.release(account(), 1, a).await);
        assert!(manager.release(account(), 1, b).await);
        assert_eq!(manager.reserve(&web3, account(), 1).await.unwrap(), 11);
    }

    #[test]
    fn test_rejection_classification() {
        assert!(rejection_proves_not_pooled(
            "insufficient funds for gas * price + value"
        ));
        assert!(rejection_proves_not_pooled("Intrinsic gas too low"));
        assert!(!rejection_proves_not_pooled("already known"));
        assert!(!rejection_proves_not_pooled(
            "replacement transaction underpriced"
        ));
        assert!(!rejection_proves_not_pooled("nonce too low"));
    }
}
