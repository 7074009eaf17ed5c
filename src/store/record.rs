//! Fixed schema of the persistent wallet record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{TransactionRecord, Utxo};
use crate::error::{Error, Result};

/// Record keys. Sensitive fields hold inner-layer ciphertext while resident
/// in memory; the store decrypts them on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Mnemonic,
    Xpriv,
    Xpub,
    AccountXpub,
    Path,
    GapLimit,
    Segwit,
    AddressesReceiving,
    AddressesChange,
    AddressesUsed,
    AddressBals,
    Txns,
    Price,
    WalletBal,
    UnspentOuts,
    PasswordHash,
    AddressWifKeys,
    DefaultAddresses,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Mnemonic,
        Field::Xpriv,
        Field::Xpub,
        Field::AccountXpub,
        Field::Path,
        Field::GapLimit,
        Field::Segwit,
        Field::AddressesReceiving,
        Field::AddressesChange,
        Field::AddressesUsed,
        Field::AddressBals,
        Field::Txns,
        Field::Price,
        Field::WalletBal,
        Field::UnspentOuts,
        Field::PasswordHash,
        Field::AddressWifKeys,
        Field::DefaultAddresses,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Mnemonic => "MNEMONIC",
            Field::Xpriv => "XPRIV",
            Field::Xpub => "XPUB",
            Field::AccountXpub => "ACCOUNT_XPUB",
            Field::Path => "PATH",
            Field::GapLimit => "GAP_LIMIT",
            Field::Segwit => "SEGWIT",
            Field::AddressesReceiving => "ADDRESSES_RECEIVING",
            Field::AddressesChange => "ADDRESSES_CHANGE",
            Field::AddressesUsed => "ADDRESSES_USED",
            Field::AddressBals => "ADDRESS_BALS",
            Field::Txns => "TXNS",
            Field::Price => "PRICE",
            Field::WalletBal => "WALLET_BAL",
            Field::UnspentOuts => "UNSPENT_OUTS",
            Field::PasswordHash => "PASSWORD_HASH",
            Field::AddressWifKeys => "ADDRESS_WIF_KEYS",
            Field::DefaultAddresses => "DEFAULT_ADDRESSES",
        }
    }

    pub fn is_sensitive(self) -> bool {
        matches!(self, Field::Mnemonic | Field::Xpriv | Field::AddressWifKeys)
    }

    /// Container values are sealed entry-by-entry and returned still sealed;
    /// callers decrypt only the entries they need.
    pub fn is_container(self) -> bool {
        matches!(self, Field::AddressWifKeys)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub mnemonic: String,
    pub xpriv: String,
    pub xpub: String,
    pub account_xpub: String,
    pub path: String,
    pub gap_limit: u32,
    pub segwit: bool,
    pub addresses_receiving: Vec<String>,
    pub addresses_change: Vec<String>,
    pub addresses_used: Vec<String>,
    pub address_bals: BTreeMap<String, u64>,
    pub txns: Vec<TransactionRecord>,
    pub price: f64,
    pub wallet_bal: u64,
    pub unspent_outs: Vec<Utxo>,
    pub password_hash: String,
    pub address_wif_keys: BTreeMap<String, String>,
    pub default_addresses: BTreeMap<String, String>,
}

impl WalletRecord {
    pub fn get_value(&self, field: Field) -> Value {
        match field {
            Field::Mnemonic => Value::String(self.mnemonic.clone()),
            Field::Xpriv => Value::String(self.xpriv.clone()),
            Field::Xpub => Value::String(self.xpub.clone()),
            Field::AccountXpub => Value::String(self.account_xpub.clone()),
            Field::Path => Value::String(self.path.clone()),
            Field::GapLimit => self.gap_limit.into(),
            Field::Segwit => self.segwit.into(),
            Field::AddressesReceiving => to_value(&self.addresses_receiving),
            Field::AddressesChange => to_value(&self.addresses_change),
            Field::AddressesUsed => to_value(&self.addresses_used),
            Field::AddressBals => to_value(&self.address_bals),
            Field::Txns => to_value(&self.txns),
            Field::Price => to_value(&self.price),
            Field::WalletBal => self.wallet_bal.into(),
            Field::UnspentOuts => to_value(&self.unspent_outs),
            Field::PasswordHash => Value::String(self.password_hash.clone()),
            Field::AddressWifKeys => to_value(&self.address_wif_keys),
            Field::DefaultAddresses => to_value(&self.default_addresses),
        }
    }

    /// Assigns a field after checking the value against the schema type.
    pub fn set_value(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Mnemonic => self.mnemonic = typed(field, value)?,
            Field::Xpriv => self.xpriv = typed(field, value)?,
            Field::Xpub => self.xpub = typed(field, value)?,
            Field::AccountXpub => self.account_xpub = typed(field, value)?,
            Field::Path => self.path = typed(field, value)?,
            Field::GapLimit => self.gap_limit = typed(field, value)?,
            Field::Segwit => self.segwit = typed(field, value)?,
            Field::AddressesReceiving => self.addresses_receiving = typed(field, value)?,
            Field::AddressesChange => self.addresses_change = typed(field, value)?,
            Field::AddressesUsed => self.addresses_used = typed(field, value)?,
            Field::AddressBals => self.address_bals = typed(field, value)?,
            Field::Txns => self.txns = typed(field, value)?,
            Field::Price => self.price = typed(field, value)?,
            Field::WalletBal => self.wallet_bal = typed(field, value)?,
            Field::UnspentOuts => self.unspent_outs = typed(field, value)?,
            Field::PasswordHash => self.password_hash = typed(field, value)?,
            Field::AddressWifKeys => self.address_wif_keys = typed(field, value)?,
            Field::DefaultAddresses => self.default_addresses = typed(field, value)?,
        }
        Ok(())
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).expect("record fields are always representable as json")
}

fn typed<T: serde::de::DeserializeOwned>(field: Field, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Store(format!("bad value for {}: {}", field.name(), e)))
}
