//! Encrypted wallet store.
//!
//! The file on disk is one authenticated-encryption token over the JSON
//! serialization of [`WalletRecord`]. Writes go through atomic replace
//! (temp file, fsync, rename), so a concurrent reader always sees the last
//! committed snapshot and a failed writer leaves the previous file intact.
//!
//! Sensitive fields carry a second, inner encryption layer under the same
//! key: the plaintext is only materialized when a caller asks for it. That
//! buys memory-residency hygiene, not extra cryptographic strength.

pub mod record;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use zeroize::Zeroizing;

use crate::crypto::{self, Token};
use crate::error::{Error, Result};

pub use record::{Field, WalletRecord};

pub struct DataStore {
    path: PathBuf,
    key: Zeroizing<[u8; crypto::KEY_SIZE]>,
    record: WalletRecord,
}

impl DataStore {
    /// Opens the store file, initializing an empty file with the default
    /// record. A failed integrity check (wrong password or tampered file)
    /// is `AuthFail`. On first successful open the password hash is
    /// backfilled into the record.
    pub fn open(path: &Path, password: &str, kdf_iterations: u32) -> Result<Self> {
        let key = Zeroizing::new(crypto::derive_key(password, b"", kdf_iterations));
        let bytes = fs::read(path)?;

        let record = if bytes.is_empty() {
            WalletRecord::default()
        } else {
            let token: Token = serde_json::from_slice(&bytes).map_err(|_| Error::AuthFail)?;
            let plain = crypto::decrypt(&key, &token)?;
            serde_json::from_slice(&plain)
                .map_err(|e| Error::Store(format!("corrupt record: {}", e)))?
        };

        let mut store = Self {
            path: path.to_path_buf(),
            key,
            record,
        };
        if store.record.password_hash.is_empty() {
            store.record.password_hash = crypto::password_hash(password);
        }
        // also commits the default record for a fresh file
        store.write()?;
        Ok(store)
    }

    /// Typed read access. Sensitive fields still hold their inner ciphertext
    /// here; use [`DataStore::get`] or [`DataStore::unseal`] for plaintext.
    pub fn record(&self) -> &WalletRecord {
        &self.record
    }

    /// Field read by name. Sensitive non-container fields are decrypted;
    /// container fields come back with each entry still sealed.
    pub fn get(&self, field: Field) -> Result<Value> {
        let value = self.record.get_value(field);
        if field.is_sensitive() && !field.is_container() {
            let sealed = value.as_str().unwrap_or_default();
            return Ok(Value::String(self.unseal(sealed)?));
        }
        Ok(value)
    }

    /// Batch write: every value is type-checked against the schema, sensitive
    /// values are inner-encrypted, then the whole record is committed with a
    /// single atomic replace.
    pub fn put(&mut self, updates: Vec<(Field, Value)>) -> Result<()> {
        for (field, value) in updates {
            let value = if field.is_sensitive() {
                self.seal_field(field, value)?
            } else {
                value
            };
            self.record.set_value(field, value)?;
        }
        self.write()
    }

    /// Decrypts one inner-layer ciphertext, e.g. a single WIF map entry.
    /// The empty string passes through (watch-only wallets store no secrets).
    pub fn unseal(&self, sealed: &str) -> Result<String> {
        if sealed.is_empty() {
            return Ok(String::new());
        }
        let token: Token = serde_json::from_str(sealed).map_err(|_| Error::AuthFail)?;
        let plain = crypto::decrypt(&self.key, &token)?;
        String::from_utf8(plain).map_err(|_| Error::Store("sealed value is not utf-8".to_string()))
    }

    /// Constant-time check of a candidate password against the stored hash.
    pub fn validate_password(&self, password: &str) -> bool {
        crypto::verify_password_hash(password, &self.record.password_hash)
    }

    /// Re-derives the file key, re-seals every sensitive value and commits
    /// the re-encrypted record in place.
    pub fn change_password(&mut self, new_password: &str, kdf_iterations: u32) -> Result<()> {
        let mnemonic = self.unseal(&self.record.mnemonic.clone())?;
        let xpriv = self.unseal(&self.record.xpriv.clone())?;
        let wifs: Vec<(String, String)> = self
            .record
            .address_wif_keys
            .clone()
            .into_iter()
            .map(|(addr, sealed)| Ok((addr, self.unseal(&sealed)?)))
            .collect::<Result<_>>()?;

        self.key = Zeroizing::new(crypto::derive_key(new_password, b"", kdf_iterations));
        self.record.mnemonic = self.seal(&mnemonic)?;
        self.record.xpriv = self.seal(&xpriv)?;
        self.record.address_wif_keys = wifs
            .into_iter()
            .map(|(addr, plain)| Ok((addr, self.seal(&plain)?)))
            .collect::<Result<_>>()?;
        self.record.password_hash = crypto::password_hash(new_password);
        self.write()
    }

    fn seal(&self, plain: &str) -> Result<String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let token = crypto::encrypt(&self.key, plain.as_bytes())?;
        serde_json::to_string(&token).map_err(|e| Error::Store(format!("seal failed: {}", e)))
    }

    fn seal_field(&self, field: Field, value: Value) -> Result<Value> {
        if field.is_container() {
            let entries: std::collections::BTreeMap<String, String> =
                serde_json::from_value(value).map_err(|e| {
                    Error::Store(format!("bad value for {}: {}", field.name(), e))
                })?;
            let sealed: Result<std::collections::BTreeMap<String, String>> = entries
                .into_iter()
                .map(|(k, plain)| Ok((k, self.seal(&plain)?)))
                .collect();
            return Ok(serde_json::to_value(sealed?)
                .expect("string map is always representable as json"));
        }
        match value {
            Value::String(plain) => Ok(Value::String(self.seal(&plain)?)),
            other => Err(Error::Store(format!(
                "bad value for {}: expected string, got {}",
                field.name(),
                other
            ))),
        }
    }

    /// Atomic replace: the target path always holds either the previous or
    /// the new complete file, never a partial write.
    fn write(&self) -> Result<()> {
        let plain = serde_json::to_vec(&self.record)
            .map_err(|e| Error::Store(format!("record serialization failed: {}", e)))?;
        let token = crypto::encrypt(&self.key, &plain)?;
        let bytes = serde_json::to_vec(&token)
            .map_err(|e| Error::Store(format!("token serialization failed: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const ITERATIONS: u32 = 1_000;

    fn new_store(dir: &TempDir, password: &str) -> DataStore {
        let path = dir.path().join("wallet_data");
        File::create(&path).unwrap();
        DataStore::open(&path, password, ITERATIONS).unwrap()
    }

    #[test]
    fn test_open_initializes_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = new_store(&dir, "pw");
        assert_eq!(store.record().gap_limit, 0);
        assert!(!store.record().password_hash.is_empty());
        assert!(store.validate_password("pw"));
        assert!(!store.validate_password("other"));
    }

    #[test]
    fn test_put_get_roundtrip_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet_data");
        {
            let mut store = new_store(&dir, "pw");
            store
                .put(vec![
                    (Field::GapLimit, json!(20)),
                    (Field::AddressesReceiving, json!(["1abc", "1def"])),
                    (Field::Price, json!(64000.5)),
                ])
                .unwrap();
        }
        let store = DataStore::open(&path, "pw", ITERATIONS).unwrap();
        assert_eq!(store.record().gap_limit, 20);
        assert_eq!(store.record().addresses_receiving, vec!["1abc", "1def"]);
        assert_eq!(store.get(Field::Price).unwrap(), json!(64000.5));
    }

    #[test]
    fn test_wrong_password_is_auth_fail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet_data");
        {
            new_store(&dir, "pw");
        }
        assert!(matches!(
            DataStore::open(&path, "wrong", ITERATIONS),
            Err(Error::AuthFail)
        ));
    }

    #[test]
    fn test_sensitive_fields_sealed_at_rest() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, "pw");
        store
            .put(vec![(Field::Mnemonic, json!("lion harvest elbow"))])
            .unwrap();

        // in-memory copy holds ciphertext, not the phrase
        assert_ne!(store.record().mnemonic, "lion harvest elbow");
        assert!(store.record().mnemonic.contains("AES-256-GCM"));
        // explicit read decrypts
        assert_eq!(store.get(Field::Mnemonic).unwrap(), json!("lion harvest elbow"));
    }

    #[test]
    fn test_wif_container_sealed_per_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, "pw");
        store
            .put(vec![(
                Field::AddressWifKeys,
                json!({"1abc": "L4Xqk", "1def": "Kwdm1"}),
            )])
            .unwrap();

        // container read comes back sealed
        let sealed = store.get(Field::AddressWifKeys).unwrap();
        let sealed_map: std::collections::BTreeMap<String, String> =
            serde_json::from_value(sealed).unwrap();
        assert_ne!(sealed_map["1abc"], "L4Xqk");
        // entries decrypt one at a time
        assert_eq!(store.unseal(&sealed_map["1abc"]).unwrap(), "L4Xqk");
        assert_eq!(store.unseal(&sealed_map["1def"]).unwrap(), "Kwdm1");
    }

    #[test]
    fn test_type_mismatch_rejected_without_write() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, "pw");
        assert!(store.put(vec![(Field::GapLimit, json!("nope"))]).is_err());
    }

    #[test]
    fn test_change_password() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet_data");
        {
            let mut store = new_store(&dir, "old");
            store
                .put(vec![
                    (Field::Mnemonic, json!("lion harvest elbow")),
                    (Field::AddressWifKeys, json!({"1abc": "L4Xqk"})),
                ])
                .unwrap();
            store.change_password("new", ITERATIONS).unwrap();
            assert!(store.validate_password("new"));
            assert!(!store.validate_password("old"));
        }

        assert!(matches!(
            DataStore::open(&path, "old", ITERATIONS),
            Err(Error::AuthFail)
        ));
        let store = DataStore::open(&path, "new", ITERATIONS).unwrap();
        assert_eq!(store.get(Field::Mnemonic).unwrap(), json!("lion harvest elbow"));
        let sealed_map: std::collections::BTreeMap<String, String> =
            serde_json::from_value(store.get(Field::AddressWifKeys).unwrap()).unwrap();
        assert_eq!(store.unseal(&sealed_map["1abc"]).unwrap(), "L4Xqk");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, "pw");
        store.put(vec![(Field::GapLimit, json!(5))]).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
