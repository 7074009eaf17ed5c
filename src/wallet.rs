//! Wallet facade.
//!
//! Ties the store, the HD engine, the remote source and the refresher
//! together behind wallet-level operations. On-disk layout per wallet:
//!
//! ```text
//! <data_dir>/wallets/<name>/
//!     wallet_data    encrypted record
//!     w_info         plain JSON {"watch_only": bool}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{self, ApiContext, BlockchainApi, TransactionRecord, Utxo};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hd::HdAccount;
use crate::refresher::{ConnectionStatus, Refresher};
use crate::store::{DataStore, Field, WalletRecord};
use crate::tx::{envelope, SelectionPolicy, TransactionBuilder};

const DATA_FILE: &str = "wallet_data";
const INFO_FILE: &str = "w_info";

#[derive(Debug, Serialize, Deserialize)]
struct WalletInfo {
    watch_only: bool,
}

pub struct Wallet {
    name: String,
    config: Config,
    watch_only: bool,
    store: Arc<Mutex<DataStore>>,
    api: Arc<dyn BlockchainApi>,
    refresher: Option<Refresher>,
}

impl Wallet {
    /// Creates the wallet directory and initializes the encrypted store with
    /// the account's derived fields. A failure after the directory is made
    /// removes it again, except when the failure is the directory already
    /// holding a wallet.
    pub fn create(
        config: &Config,
        name: &str,
        password: &str,
        account: &HdAccount,
        watch_only: bool,
    ) -> Result<()> {
        let dir = wallet_dir(config, name);
        if dir.join(DATA_FILE).exists() {
            return Err(Error::WalletAlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;

        let result = initialize(config, &dir, password, account, watch_only);
        if result.is_err() {
            let _ = fs::remove_dir_all(&dir);
        }
        result
    }

    /// Opens a wallet with the backend named by `config.api_source`. Unless
    /// `offline`, the background refresher starts immediately (requires a
    /// running tokio runtime).
    pub fn open(config: &Config, name: &str, password: &str, offline: bool) -> Result<Self> {
        let api = Self::resolve_api(config, name, password)?;
        Self::open_with_api(config, name, password, offline, api)
    }

    /// Same as [`Wallet::open`] with a caller-supplied data source, the hook
    /// for custom backends.
    pub fn open_with_api(
        config: &Config,
        name: &str,
        password: &str,
        offline: bool,
        api: Arc<dyn BlockchainApi>,
    ) -> Result<Self> {
        let dir = wallet_dir(config, name);
        let data_path = dir.join(DATA_FILE);
        if !data_path.exists() {
            return Err(Error::WalletNotFound(name.to_string()));
        }
        let info: WalletInfo = serde_json::from_slice(&fs::read(dir.join(INFO_FILE))?)
            .map_err(|e| Error::Store(format!("corrupt w_info: {}", e)))?;

        let store = DataStore::open(&data_path, password, config.kdf_iterations)?;
        let store = Arc::new(Mutex::new(store));

        let refresher = if offline {
            None
        } else {
            Some(Refresher::spawn(
                store.clone(),
                api.clone(),
                config.refresh_rate(),
            ))
        };

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            watch_only: info.watch_only,
            store,
            api,
            refresher,
        })
    }

    fn resolve_api(
        config: &Config,
        name: &str,
        password: &str,
    ) -> Result<Arc<dyn BlockchainApi>> {
        // the address list seeds the source; it is fixed for the session
        let dir = wallet_dir(config, name);
        let data_path = dir.join(DATA_FILE);
        if !data_path.exists() {
            return Err(Error::WalletNotFound(name.to_string()));
        }
        let store = DataStore::open(&data_path, password, config.kdf_iterations)?;
        let record = store.record();
        let mut addresses = record.addresses_receiving.clone();
        addresses.extend(record.addresses_change.iter().cloned());
        addresses.extend(record.addresses_used.iter().cloned());
        api::source_for(
            &config.api_source,
            ApiContext {
                addresses,
                currency: config.currency.clone(),
                refresh_rate: config.refresh_rate(),
                timeout: config.request_timeout(),
            },
        )
    }

    /// Stops the refresher (awaiting quiescence) and drops cached key
    /// material with the store.
    pub async fn close(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop().await;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_watch_only(&self) -> bool {
        self.watch_only
    }

    /// Refresher state, `None` when opened offline.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.refresher.as_ref().map(|r| r.status())
    }

    pub fn balance(&self) -> u64 {
        self.record().wallet_bal
    }

    pub fn price(&self) -> f64 {
        self.record().price
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.record().txns
    }

    pub fn unspent_outputs(&self) -> Vec<Utxo> {
        self.record().unspent_outs
    }

    pub fn receiving_addresses(&self) -> Vec<String> {
        self.record().addresses_receiving
    }

    pub fn change_addresses(&self) -> Vec<String> {
        self.record().addresses_change
    }

    pub fn used_addresses(&self) -> Vec<String> {
        self.record().addresses_used
    }

    pub fn account_xpub(&self) -> String {
        self.record().account_xpub
    }

    pub async fn fee_rate_estimates(&self) -> Result<BTreeMap<u16, f64>> {
        self.api.fee_rate_estimates().await
    }

    /// Builds an unsigned transaction over the current UTXO snapshot, paying
    /// change to the first change address.
    pub fn make_unsigned_transaction(
        &self,
        outputs: BTreeMap<String, u64>,
        fee: u64,
        policy: SelectionPolicy,
        locktime: u32,
    ) -> Result<TransactionBuilder> {
        if outputs.is_empty() {
            return Err(Error::UnsupportedAddress("no outputs given".to_string()));
        }
        let record = self.record();
        let change_address = record
            .addresses_change
            .first()
            .cloned()
            .or_else(|| record.default_addresses.get("change").cloned())
            .ok_or_else(|| Error::Store("wallet has no change address".to_string()))?;

        TransactionBuilder::build(
            self.config.network(),
            record.unspent_outs,
            outputs.into_iter().collect(),
            change_address,
            fee,
            record.segwit,
            locktime,
            policy,
        )
    }

    /// Decrypts exactly the WIF keys of the transaction's input addresses and
    /// signs. The password is re-validated first.
    pub fn sign_transaction(
        &self,
        builder: &mut TransactionBuilder,
        password: &str,
    ) -> Result<()> {
        self.verify_password(password)?;
        if self.watch_only {
            return Err(Error::WatchOnly);
        }

        let keys = {
            let guard = self.store.lock().expect("store lock poisoned");
            let record = guard.record();
            let mut keys = BTreeMap::new();
            for address in builder.input_addresses() {
                let sealed = record.address_wif_keys.get(address).ok_or_else(|| {
                    Error::Signing(format!("wallet holds no key for {}", address))
                })?;
                keys.insert(address.clone(), guard.unseal(sealed)?);
            }
            keys
        };
        builder.sign(&keys)
    }

    /// Hands the signed hex to the backend's broadcast endpoint.
    pub async fn broadcast_transaction(&self, builder: &TransactionBuilder) -> Result<(bool, u16)> {
        if !builder.is_signed() {
            return Err(Error::Signing(
                "refusing to broadcast an unsigned transaction".to_string(),
            ));
        }
        self.api.broadcast_transaction(&builder.raw_hex()).await
    }

    /// Serializes a built transaction bound to this wallet's account xpub.
    pub fn export_transaction(&self, builder: &TransactionBuilder) -> Result<String> {
        envelope::export(builder, &self.record().account_xpub)
    }

    /// Parses an exported transaction; fails `InvalidImport` when it was
    /// bound to a different wallet.
    pub fn import_transaction(&self, text: &str) -> Result<TransactionBuilder> {
        envelope::import(text, &self.record().account_xpub, self.config.network())
    }

    pub fn get_mnemonic(&self, password: &str) -> Result<String> {
        self.verify_password(password)?;
        if self.watch_only {
            return Err(Error::WatchOnly);
        }
        let guard = self.store.lock().expect("store lock poisoned");
        Ok(guard.get(Field::Mnemonic)?.as_str().unwrap_or_default().to_string())
    }

    pub fn get_xpriv(&self, password: &str) -> Result<String> {
        self.verify_password(password)?;
        if self.watch_only {
            return Err(Error::WatchOnly);
        }
        let guard = self.store.lock().expect("store lock poisoned");
        Ok(guard.get(Field::Xpriv)?.as_str().unwrap_or_default().to_string())
    }

    /// WIF keys for the given addresses (all wallet addresses when empty).
    pub fn get_wif_keys(
        &self,
        password: &str,
        addresses: &[String],
    ) -> Result<BTreeMap<String, String>> {
        self.verify_password(password)?;
        if self.watch_only {
            return Err(Error::WatchOnly);
        }
        let guard = self.store.lock().expect("store lock poisoned");
        let record = guard.record();
        let mut keys = BTreeMap::new();
        for (address, sealed) in &record.address_wif_keys {
            if addresses.is_empty() || addresses.contains(address) {
                keys.insert(address.clone(), guard.unseal(sealed)?);
            }
        }
        Ok(keys)
    }

    pub fn validate_password(&self, password: &str) -> bool {
        self.store
            .lock()
            .expect("store lock poisoned")
            .validate_password(password)
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        self.verify_password(old_password)?;
        self.store
            .lock()
            .expect("store lock poisoned")
            .change_password(new_password, self.config.kdf_iterations)
    }

    fn verify_password(&self, password: &str) -> Result<()> {
        if !self.validate_password(password) {
            return Err(Error::IncorrectPassword);
        }
        Ok(())
    }

    fn record(&self) -> WalletRecord {
        self.store.lock().expect("store lock poisoned").record().clone()
    }

    /// Names of every initialized wallet, sorted.
    pub fn list(config: &Config) -> Result<Vec<String>> {
        let wallets_dir = config.wallets_dir();
        if !wallets_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(wallets_dir)? {
            let entry = entry?;
            if entry.path().join(DATA_FILE).exists() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(config: &Config, name: &str) -> Result<()> {
        let dir = wallet_dir(config, name);
        if !dir.join(DATA_FILE).exists() {
            return Err(Error::WalletNotFound(name.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}

fn initialize(
    config: &Config,
    dir: &PathBuf,
    password: &str,
    account: &HdAccount,
    watch_only: bool,
) -> Result<()> {
    // a public account can never sign, regardless of the caller's flag
    let watch_only = watch_only || !account.is_private();

    fs::write(
        dir.join(INFO_FILE),
        serde_json::to_vec(&WalletInfo { watch_only })
            .map_err(|e| Error::Store(format!("w_info serialization failed: {}", e)))?,
    )?;

    let data_path = dir.join(DATA_FILE);
    fs::File::create(&data_path)?;
    let mut store = DataStore::open(&data_path, password, config.kdf_iterations)?;

    let (receiving, change) = account.addresses()?;
    let wif_keys: BTreeMap<String, String> = if watch_only {
        BTreeMap::new()
    } else {
        account.address_wif_pairs()?.into_iter().collect()
    };
    let mut defaults = BTreeMap::new();
    defaults.insert(
        "receiving".to_string(),
        receiving.first().cloned().unwrap_or_default(),
    );
    defaults.insert(
        "change".to_string(),
        change.first().cloned().unwrap_or_default(),
    );

    let mnemonic = if watch_only {
        String::new()
    } else {
        account.mnemonic().unwrap_or_default().to_string()
    };
    let xpriv = if watch_only {
        String::new()
    } else {
        account.root_xpriv().unwrap_or_default()
    };

    store.put(vec![
        (Field::Mnemonic, json!(mnemonic)),
        (Field::Xpriv, json!(xpriv)),
        (Field::Xpub, json!(account.root_xpub())),
        (Field::AccountXpub, json!(account.account_xpub())),
        (Field::Path, json!(account.path())),
        (Field::GapLimit, json!(account.gap_limit())),
        (Field::Segwit, json!(account.is_segwit())),
        (Field::AddressesReceiving, json!(receiving)),
        (Field::AddressesChange, json!(change)),
        (Field::AddressWifKeys, json!(wif_keys)),
        (Field::DefaultAddresses, json!(defaults)),
    ])
}

fn wallet_dir(config: &Config, name: &str) -> PathBuf {
    config.wallets_dir().join(sanitize_name(name))
}

/// Wallet name as a directory name.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
