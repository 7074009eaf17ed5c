//! Background API refresher.
//!
//! One cooperatively cancelled worker per open wallet. Each tick fetches the
//! remote view, writes only the record keys whose value actually changed
//! (one atomic store commit, so readers never see a torn tick) and moves
//! newly seen addresses into the used partition. Remote failures flip the
//! status to `Error` and the worker simply waits for its next tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::BlockchainApi;
use crate::config::MIN_REFRESH_RATE;
use crate::error::Result;
use crate::store::{DataStore, Field};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Good(DateTime<Utc>),
    Error(String),
}

pub struct Refresher {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl Refresher {
    /// Starts the worker. The interval is clamped to the 5 second floor to
    /// keep backends unharassed.
    pub fn spawn(
        store: Arc<Mutex<DataStore>>,
        api: Arc<dyn BlockchainApi>,
        interval: Duration,
    ) -> Self {
        let interval = interval.max(Duration::from_secs(MIN_REFRESH_RATE));
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let child = cancel.child_token();
        let task = tokio::spawn(async move {
            run_loop(store, api, interval, child, status_tx).await;
        });

        Self {
            cancel,
            task: Some(task),
            status: status_rx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Signals the worker and waits for it to leave the loop. An in-progress
    /// store commit always completes first; only the inter-tick wait is
    /// interrupted.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::info!("refresher stopped");
    }
}

async fn run_loop(
    store: Arc<Mutex<DataStore>>,
    api: Arc<dyn BlockchainApi>,
    interval: Duration,
    cancel: CancellationToken,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match refresh_tick(&store, api.as_ref(), &cancel).await {
            Ok(()) => {
                let _ = status_tx.send(ConnectionStatus::Good(Utc::now()));
            }
            Err(e) if e.is_remote() => {
                tracing::warn!("refresh tick failed, retrying next tick: {}", e);
                let _ = status_tx.send(ConnectionStatus::Error(e.to_string()));
            }
            Err(e) => {
                tracing::error!("refresh tick failed locally: {}", e);
                let _ = status_tx.send(ConnectionStatus::Error(e.to_string()));
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One reconciliation pass. The store lock is never held across a request.
pub(crate) async fn refresh_tick(
    store: &Arc<Mutex<DataStore>>,
    api: &dyn BlockchainApi,
    cancel: &CancellationToken,
) -> Result<()> {
    let record = store.lock().expect("store lock poisoned").record().clone();

    if cancel.is_cancelled() {
        return Ok(());
    }
    let txns = api.transactions().await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    let wallet_bal = api.wallet_balance().await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    let address_bals = api.address_balances().await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    let unspent = api.unspent_outputs().await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    let price = api.price().await?;

    let mut updates = Vec::new();
    let mut push_if_changed = |field: Field, value: serde_json::Value| {
        if record.get_value(field) != value {
            updates.push((field, value));
        }
    };
    push_if_changed(Field::Txns, to_value(&txns));
    push_if_changed(Field::WalletBal, to_value(&wallet_bal));
    push_if_changed(Field::AddressBals, to_value(&address_bals));
    push_if_changed(Field::UnspentOuts, to_value(&unspent));
    push_if_changed(Field::Price, to_value(&price));

    // re-partition: an address seen in any transaction is used from now on
    let seen: HashSet<&str> = txns
        .iter()
        .flat_map(|tx| {
            tx.inputs
                .iter()
                .map(|i| i.address.as_str())
                .chain(tx.outputs.iter().map(|o| o.address.as_str()))
        })
        .collect();

    let moved: Vec<String> = record
        .addresses_receiving
        .iter()
        .chain(record.addresses_change.iter())
        .filter(|addr| seen.contains(addr.as_str()))
        .cloned()
        .collect();

    if !moved.is_empty() {
        let receiving: Vec<&String> = record
            .addresses_receiving
            .iter()
            .filter(|a| !moved.contains(a))
            .collect();
        let change: Vec<&String> = record
            .addresses_change
            .iter()
            .filter(|a| !moved.contains(a))
            .collect();
        let mut used = record.addresses_used.clone();
        for addr in &moved {
            if !used.contains(addr) {
                used.push(addr.clone());
            }
        }
        updates.push((Field::AddressesReceiving, to_value(&receiving)));
        updates.push((Field::AddressesChange, to_value(&change)));
        updates.push((Field::AddressesUsed, to_value(&used)));
    }

    if updates.is_empty() {
        return Ok(());
    }
    store.lock().expect("store lock poisoned").put(updates)
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("refreshed values are always representable as json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs::File;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::api::{TransactionRecord, TxInputRef, TxOutputRef};
    use crate::error::Error;

    struct StubApi {
        addresses: Vec<String>,
        txns: Vec<TransactionRecord>,
        fail: bool,
    }

    #[async_trait]
    impl BlockchainApi for StubApi {
        fn watched_addresses(&self) -> &[String] {
            &self.addresses
        }

        async fn transactions(&self) -> Result<Vec<TransactionRecord>> {
            if self.fail {
                return Err(Error::Network("stub is offline".to_string()));
            }
            Ok(self.txns.clone())
        }

        async fn blockchain_height(&self) -> Result<u64> {
            Ok(700_000)
        }

        async fn price(&self) -> Result<f64> {
            Ok(61_000.0)
        }

        async fn broadcast_transaction(&self, _raw_hex: &str) -> Result<(bool, u16)> {
            Ok((true, 200))
        }

        async fn fee_rate_estimates(&self) -> Result<BTreeMap<u16, f64>> {
            Ok(BTreeMap::new())
        }
    }

    fn spend_to(address: &str, value: u64) -> TransactionRecord {
        TransactionRecord {
            txid: format!("tx-{}", address),
            date: "2021-06-01 10:00:00".to_string(),
            block_height: Some(690_000),
            confirmations: 12,
            fee: 300,
            size: 226,
            inputs: vec![TxInputRef {
                value: value + 300,
                address: "1ForeignSender".to_string(),
                n: 0,
            }],
            outputs: vec![TxOutputRef {
                value,
                address: address.to_string(),
                n: 0,
                spent: false,
                script: "76a914aa".to_string(),
            }],
            wallet_amount: value as i64,
        }
    }

    fn seeded_store(dir: &TempDir) -> Arc<Mutex<DataStore>> {
        let path = dir.path().join("wallet_data");
        File::create(&path).unwrap();
        let mut store = DataStore::open(&path, "pw", 1_000).unwrap();
        store
            .put(vec![
                (Field::AddressesReceiving, json!(["1recv0", "1recv1"])),
                (Field::AddressesChange, json!(["1chg0"])),
            ])
            .unwrap();
        Arc::new(Mutex::new(store))
    }

    #[tokio::test]
    async fn test_tick_reconciles_and_repartitions() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let api = StubApi {
            addresses: vec!["1recv0".into(), "1recv1".into(), "1chg0".into()],
            txns: vec![spend_to("1recv0", 5_000)],
            fail: false,
        };

        refresh_tick(&store, &api, &CancellationToken::new())
            .await
            .unwrap();

        let guard = store.lock().unwrap();
        let record = guard.record();
        assert_eq!(record.txns.len(), 1);
        assert_eq!(record.wallet_bal, 5_000);
        assert_eq!(record.address_bals["1recv0"], 5_000);
        assert_eq!(record.unspent_outs.len(), 1);
        assert_eq!(record.price, 61_000.0);

        // 1recv0 appeared in a transaction and moved to the used partition
        assert_eq!(record.addresses_receiving, vec!["1recv1"]);
        assert_eq!(record.addresses_change, vec!["1chg0"]);
        assert_eq!(record.addresses_used, vec!["1recv0"]);
    }

    #[tokio::test]
    async fn test_partitions_stay_disjoint_across_ticks() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let api = StubApi {
            addresses: vec!["1recv0".into(), "1recv1".into(), "1chg0".into()],
            txns: vec![spend_to("1recv0", 5_000), spend_to("1chg0", 700)],
            fail: false,
        };

        for _ in 0..3 {
            refresh_tick(&store, &api, &CancellationToken::new())
                .await
                .unwrap();
        }

        let guard = store.lock().unwrap();
        let record = guard.record();
        let mut all: Vec<&String> = record
            .addresses_receiving
            .iter()
            .chain(record.addresses_change.iter())
            .chain(record.addresses_used.iter())
            .collect();
        let before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(before, all.len(), "partitions overlap");
        assert_eq!(record.addresses_used, vec!["1recv0", "1chg0"]);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let before = store.lock().unwrap().record().clone();
        let api = StubApi {
            addresses: vec![],
            txns: vec![],
            fail: true,
        };

        let result = refresh_tick(&store, &api, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(*store.lock().unwrap().record(), before);
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let api = Arc::new(StubApi {
            addresses: vec!["1recv0".into()],
            txns: vec![],
            fail: false,
        });

        let refresher = Refresher::spawn(store, api, Duration::from_secs(5));
        // the first tick runs immediately; give it a moment
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            refresher.status(),
            ConnectionStatus::Good(_) | ConnectionStatus::Connecting
        ));
        refresher.stop().await;
    }
}
