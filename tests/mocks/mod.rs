use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use bitstore::api::{BlockchainApi, TransactionRecord};
use bitstore::error::Result;

/// In-memory data source: serves canned transactions, records broadcasts.
pub struct MockApi {
    addresses: Vec<String>,
    txns: Mutex<Vec<TransactionRecord>>,
    pub broadcasts: Mutex<Vec<String>>,
    height: u64,
    price: f64,
}

impl MockApi {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            txns: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            height: 700_000,
            price: 58_400.25,
        }
    }

    pub fn set_transactions(&self, txns: Vec<TransactionRecord>) {
        *self.txns.lock().unwrap() = txns;
    }
}

#[async_trait]
impl BlockchainApi for MockApi {
    fn watched_addresses(&self) -> &[String] {
        &self.addresses
    }

    async fn transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.txns.lock().unwrap().clone())
    }

    async fn blockchain_height(&self) -> Result<u64> {
        Ok(self.height)
    }

    async fn price(&self) -> Result<f64> {
        Ok(self.price)
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<(bool, u16)> {
        self.broadcasts.lock().unwrap().push(raw_hex.to_string());
        Ok((true, 200))
    }

    async fn fee_rate_estimates(&self) -> Result<BTreeMap<u16, f64>> {
        Ok(BTreeMap::from([(1, 32.0), (6, 11.5)]))
    }
}
