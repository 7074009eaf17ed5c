//! Pluggable remote-data sources.
//!
//! Every backend exposes the same normalized contract; values are satoshi.
//! New backends only have to produce `transactions()` — the UTXO and balance
//! views have shared derivations over the transaction set.

pub mod blockchain_info;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInputRef {
    pub value: u64,
    pub address: String,
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutputRef {
    pub value: u64,
    pub address: String,
    pub n: u32,
    pub spent: bool,
    pub script: String,
}

/// Normalized, source-agnostic transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: String,
    pub date: String,
    pub block_height: Option<u64>,
    pub confirmations: u64,
    pub fee: u64,
    pub size: u64,
    pub inputs: Vec<TxInputRef>,
    pub outputs: Vec<TxOutputRef>,
    /// Signed delta of the owning wallet's value across this transaction.
    pub wallet_amount: i64,
}

/// Unspent transaction output. Identity is `(txid, output_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub output_index: u32,
    pub address: String,
    pub script: String,
    pub value: u64,
    pub confirmations: u64,
}

impl Utxo {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

/// Uniform remote-data contract. Implementations cache their most recent
/// successful response for their refresh interval, so repeated calls inside
/// one window cost no network I/O.
#[async_trait]
pub trait BlockchainApi: Send + Sync {
    /// Addresses the source was opened with (receiving, change and used).
    fn watched_addresses(&self) -> &[String];

    async fn transactions(&self) -> Result<Vec<TransactionRecord>>;

    async fn blockchain_height(&self) -> Result<u64>;

    /// Fiat price of one BTC in the configured currency.
    async fn price(&self) -> Result<f64>;

    /// Hands raw transaction hex to the backend. Returns whether the backend
    /// accepted it plus the HTTP status code.
    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<(bool, u16)>;

    /// Confirmation-target (blocks) to sat/vB estimates.
    async fn fee_rate_estimates(&self) -> Result<BTreeMap<u16, f64>>;

    async fn unspent_outputs(&self) -> Result<Vec<Utxo>> {
        let txs = self.transactions().await?;
        Ok(derive_unspent(&txs, self.watched_addresses()))
    }

    async fn address_balances(&self) -> Result<BTreeMap<String, u64>> {
        let utxos = self.unspent_outputs().await?;
        Ok(balances_of(&utxos))
    }

    /// Total confirmed satoshi across all wallet addresses.
    async fn wallet_balance(&self) -> Result<u64> {
        let utxos = self.unspent_outputs().await?;
        Ok(utxos
            .iter()
            .filter(|u| u.is_confirmed())
            .map(|u| u.value)
            .sum())
    }
}

/// Unspent view shared by backends: outputs that are not spent and pay a
/// wallet address, one entry per `(txid, n)`.
pub fn derive_unspent(txs: &[TransactionRecord], addresses: &[String]) -> Vec<Utxo> {
    let wallet: HashSet<&str> = addresses.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut utxos = Vec::new();
    for tx in txs {
        for out in &tx.outputs {
            if out.spent || !wallet.contains(out.address.as_str()) {
                continue;
            }
            if !seen.insert((tx.txid.clone(), out.n)) {
                continue;
            }
            utxos.push(Utxo {
                txid: tx.txid.clone(),
                output_index: out.n,
                address: out.address.clone(),
                script: out.script.clone(),
                value: out.value,
                confirmations: tx.confirmations,
            });
        }
    }
    utxos
}

pub fn balances_of(utxos: &[Utxo]) -> BTreeMap<String, u64> {
    let mut balances = BTreeMap::new();
    for utxo in utxos {
        *balances.entry(utxo.address.clone()).or_insert(0) += utxo.value;
    }
    balances
}

/// Construction parameters shared by all sources.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub addresses: Vec<String>,
    pub currency: String,
    pub refresh_rate: Duration,
    pub timeout: Duration,
}

/// Resolves a string-keyed source implementation.
pub fn source_for(key: &str, ctx: ApiContext) -> Result<Arc<dyn BlockchainApi>> {
    match key {
        blockchain_info::SOURCE_KEY => {
            Ok(Arc::new(blockchain_info::BlockchainInfoApi::new(ctx)?))
        }
        other => Err(Error::UnknownApiSource(other.to_string())),
    }
}
