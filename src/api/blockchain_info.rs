//! blockchain.info backend.
//!
//! One `multiaddr` request covers transactions for every wallet address;
//! `latestblock` and `ticker` fill in the height and the fiat price. The
//! whole snapshot is cached for the refresh interval.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::api::{ApiContext, BlockchainApi, TransactionRecord, TxInputRef, TxOutputRef};
use crate::error::{Error, Result};
use crate::utils;

pub const SOURCE_KEY: &str = "blockchain.info";

const BASE_URL: &str = "https://blockchain.info";

pub struct BlockchainInfoApi {
    client: reqwest::Client,
    base_url: String,
    addresses: Vec<String>,
    currency: String,
    refresh_rate: Duration,
    cache: Mutex<Option<Snapshot>>,
}

#[derive(Clone)]
struct Snapshot {
    fetched_at: Instant,
    transactions: Vec<TransactionRecord>,
    height: u64,
    price: f64,
}

impl BlockchainInfoApi {
    pub fn new(ctx: ApiContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ctx.timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            addresses: ctx.addresses,
            currency: ctx.currency,
            refresh_rate: ctx.refresh_rate,
            cache: Mutex::new(None),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Network(format!("{} returned {}", url, status)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Parse(format!("bad response from {}: {}", url, e)))
    }

    /// Returns the cached snapshot when it is younger than the refresh rate,
    /// otherwise fetches a fresh one.
    async fn snapshot(&self) -> Result<Snapshot> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.fetched_at.elapsed() < self.refresh_rate {
                return Ok(snapshot.clone());
            }
        }

        let active = self.addresses.join("|");
        let multiaddr: RawMultiaddr = self
            .get_json(&format!("{}/multiaddr?active={}&n=100", self.base_url, active))
            .await?;
        let latest: RawLatestBlock = self
            .get_json(&format!("{}/latestblock", self.base_url))
            .await?;
        let ticker: BTreeMap<String, RawTickerEntry> =
            self.get_json(&format!("{}/ticker", self.base_url)).await?;

        let price = ticker
            .get(&self.currency)
            .map(|entry| entry.last)
            .ok_or_else(|| {
                Error::Parse(format!("ticker has no entry for {}", self.currency))
            })?;

        let transactions = multiaddr
            .txs
            .iter()
            .map(|raw| normalize_tx(raw, latest.height))
            .collect();

        let snapshot = Snapshot {
            fetched_at: Instant::now(),
            transactions,
            height: latest.height,
            price,
        };
        *cache = Some(snapshot.clone());
        Ok(snapshot)
    }
}

#[async_trait]
impl BlockchainApi for BlockchainInfoApi {
    fn watched_addresses(&self) -> &[String] {
        &self.addresses
    }

    async fn transactions(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.snapshot().await?.transactions)
    }

    async fn blockchain_height(&self) -> Result<u64> {
        Ok(self.snapshot().await?.height)
    }

    async fn price(&self) -> Result<f64> {
        Ok(self.snapshot().await?.price)
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<(bool, u16)> {
        let response = self
            .client
            .post(format!("{}/pushtx", self.base_url))
            .form(&[("tx", raw_hex)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("broadcast failed: {}", e)))?;
        let status = response.status();
        Ok((status.is_success(), status.as_u16()))
    }

    async fn fee_rate_estimates(&self) -> Result<BTreeMap<u16, f64>> {
        let fees: RawMempoolFees = self
            .get_json("https://api.blockchain.info/mempool/fees")
            .await?;
        // regular confirms within roughly an hour, priority next-block
        let mut estimates = BTreeMap::new();
        estimates.insert(1, fees.priority as f64);
        estimates.insert(6, fees.regular as f64);
        Ok(estimates)
    }
}

fn normalize_tx(raw: &RawTx, chain_height: u64) -> TransactionRecord {
    let confirmations = match raw.block_height {
        Some(height) if chain_height >= height => chain_height - height + 1,
        _ => 0,
    };
    TransactionRecord {
        txid: raw.hash.clone(),
        date: utils::format_timestamp(raw.time),
        block_height: raw.block_height,
        confirmations,
        fee: raw.fee,
        size: raw.size,
        inputs: raw
            .inputs
            .iter()
            .filter_map(|input| input.prev_out.as_ref())
            .map(|prev| TxInputRef {
                value: prev.value,
                address: prev.addr.clone().unwrap_or_default(),
                n: prev.n,
            })
            .collect(),
        outputs: raw
            .out
            .iter()
            .map(|out| TxOutputRef {
                value: out.value,
                address: out.addr.clone().unwrap_or_default(),
                n: out.n,
                spent: out.spent,
                script: out.script.clone(),
            })
            .collect(),
        wallet_amount: raw.result,
    }
}

#[derive(Debug, Deserialize)]
struct RawMultiaddr {
    txs: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    time: i64,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    fee: u64,
    size: u64,
    /// Wallet-relative value delta.
    result: i64,
    inputs: Vec<RawInput>,
    out: Vec<RawOut>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    #[serde(default)]
    prev_out: Option<RawOut>,
}

#[derive(Debug, Deserialize)]
struct RawOut {
    value: u64,
    #[serde(default)]
    addr: Option<String>,
    n: u32,
    #[serde(default)]
    spent: bool,
    #[serde(default)]
    script: String,
}

#[derive(Debug, Deserialize)]
struct RawLatestBlock {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct RawTickerEntry {
    last: f64,
}

#[derive(Debug, Deserialize)]
struct RawMempoolFees {
    regular: u64,
    priority: u64,
}
