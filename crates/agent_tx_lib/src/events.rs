use crate::db::model::TxDao;
use crate::model::TxStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Single pipeline transition, for consumers that want to follow their
/// transaction without polling the API.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub tx_id: i64,
    pub uid: String,
    pub user_id: String,
    pub chain_id: i64,
    pub from_status: Option<TxStatus>,
    pub to_status: TxStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn for_tx(tx: &TxDao, from_status: Option<TxStatus>, to_status: TxStatus) -> Self {
        StatusUpdate {
            tx_id: tx.id,
            uid: tx.uid.clone(),
            user_id: tx.user_id.clone(),
            chain_id: tx.chain_id,
            from_status,
            to_status,
            tx_hash: tx.tx_hash.clone(),
            error: tx.error.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Fan-out of status updates over a broadcast channel. Emitting never
/// blocks, updates sent while nobody listens are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StatusUpdate>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }

    pub fn emit(&self, update: StatusUpdate) {
        let _ = self.sender.send(update);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::create_native_transfer;
    use std::str::FromStr;
    use web3::types::{Address, U256};

    fn sample_tx() -> TxDao {
        create_native_transfer(
            "user-1",
            "payments",
            Address::from_str("0x0000000000000000000000000000000000000001").unwrap(),
            Address::from_str("0x0000000000000000000000000000000000000002").unwrap(),
            1,
            U256::from(100u64),
        )
    }

    #[tokio::test]
    async fn test_subscriber_receives_updates_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let tx = sample_tx();

        bus.emit(StatusUpdate::for_tx(&tx, None, TxStatus::Pending));
        bus.emit(StatusUpdate::for_tx(
            &tx,
            Some(TxStatus::Pending),
            TxStatus::Simulated,
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.to_status, TxStatus::Pending);
        assert_eq!(first.uid, tx.uid);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.from_status, Some(TxStatus::Pending));
        assert_eq!(second.to_status, TxStatus::Simulated);
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let bus = EventBus::default();
        let tx = sample_tx();
        bus.emit(StatusUpdate::for_tx(&tx, None, TxStatus::Pending));
    }
}
