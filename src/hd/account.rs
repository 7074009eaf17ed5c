//! BIP32 account derivation.
//!
//! The account key is reached by walking the configured path from the key the
//! wallet was created with (usually the master key built from a mnemonic
//! seed). The external (receiving) and internal (change) chains are the fixed
//! 0- and 1-indexed children of the account key; addresses and WIF keys are
//! materialized for indices `0..gap_limit` on each chain.

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::key::{CompressedPublicKey, Secp256k1};
use bitcoin::{Address, Network, NetworkKind};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::hd::path::HdPath;
use crate::mnemonic;

/// One level of the key tree, public side always present.
#[derive(Clone)]
struct KeyPair {
    xpriv: Option<Xpriv>,
    xpub: Xpub,
}

impl KeyPair {
    fn from_xpriv(secp: &Secp256k1<bitcoin::secp256k1::All>, xpriv: Xpriv) -> Self {
        Self {
            xpub: Xpub::from_priv(secp, &xpriv),
            xpriv: Some(xpriv),
        }
    }

    fn erase(&mut self) {
        if let Some(xpriv) = &mut self.xpriv {
            xpriv.private_key.non_secure_erase();
        }
    }
}

// no Debug: extended private keys must not end up in logs
#[derive(Clone)]
pub struct HdAccount {
    network: Network,
    path: HdPath,
    gap_limit: u32,
    segwit: bool,
    mnemonic: Option<String>,
    root: KeyPair,
    account: KeyPair,
    external: KeyPair,
    internal: KeyPair,
}

impl HdAccount {
    /// Builds the account from a validated mnemonic: seed, master key, path
    /// walk. The mnemonic is retained so wallet creation can persist it.
    pub fn from_mnemonic(
        words: &str,
        passphrase: &str,
        path_text: &str,
        gap_limit: u32,
        segwit: bool,
        network: Network,
    ) -> Result<Self> {
        if !mnemonic::validate(words) {
            return Err(Error::InvalidMnemonic(
                "checksum or word membership failed".to_string(),
            ));
        }
        let seed = mnemonic::to_seed(words, passphrase);
        let master = master_key_from_seed(&seed, network)?;
        let mut account = Self::from_master_xpriv(master, path_text, gap_limit, segwit, network)?;
        account.mnemonic = Some(words.to_string());
        Ok(account)
    }

    /// Builds the account from extended-key text: `xprv`/`tprv` yield a
    /// signing account, `xpub`/`tpub` a watch-only one. Walking a hardened
    /// path from a public key is impossible and rejected.
    pub fn from_extended_key(
        key_text: &str,
        path_text: &str,
        gap_limit: u32,
        segwit: bool,
        network: Network,
    ) -> Result<Self> {
        if let Ok(xpriv) = key_text.parse::<Xpriv>() {
            check_network(xpriv.network, network)?;
            return Self::from_master_xpriv(xpriv, path_text, gap_limit, segwit, network);
        }
        let xpub = key_text
            .parse::<Xpub>()
            .map_err(|e| Error::InvalidExtendedKey(format!("{}", e)))?;
        check_network(xpub.network, network)?;
        Self::from_root_xpub(xpub, path_text, gap_limit, segwit, network)
    }

    fn from_master_xpriv(
        root_xpriv: Xpriv,
        path_text: &str,
        gap_limit: u32,
        segwit: bool,
        network: Network,
    ) -> Result<Self> {
        let path: HdPath = path_text.parse()?;
        let secp = Secp256k1::new();

        let account_xpriv = root_xpriv
            .derive_priv(&secp, &path.components())
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
        let external_xpriv = account_xpriv
            .derive_priv(&secp, &[ChildNumber::Normal { index: 0 }])
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
        let internal_xpriv = account_xpriv
            .derive_priv(&secp, &[ChildNumber::Normal { index: 1 }])
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;

        Ok(Self {
            network,
            path,
            gap_limit,
            segwit,
            mnemonic: None,
            root: KeyPair::from_xpriv(&secp, root_xpriv),
            account: KeyPair::from_xpriv(&secp, account_xpriv),
            external: KeyPair::from_xpriv(&secp, external_xpriv),
            internal: KeyPair::from_xpriv(&secp, internal_xpriv),
        })
    }

    fn from_root_xpub(
        root_xpub: Xpub,
        path_text: &str,
        gap_limit: u32,
        segwit: bool,
        network: Network,
    ) -> Result<Self> {
        let path: HdPath = path_text.parse()?;
        if path.has_hardened() {
            return Err(Error::InvalidPath(
                "hardened derivation is impossible from a public key".to_string(),
            ));
        }
        let secp = Secp256k1::new();

        let account_xpub = root_xpub
            .derive_pub(&secp, &path.components())
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
        let external_xpub = account_xpub
            .derive_pub(&secp, &[ChildNumber::Normal { index: 0 }])
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
        let internal_xpub = account_xpub
            .derive_pub(&secp, &[ChildNumber::Normal { index: 1 }])
            .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;

        Ok(Self {
            network,
            path,
            gap_limit,
            segwit,
            mnemonic: None,
            root: KeyPair {
                xpriv: None,
                xpub: root_xpub,
            },
            account: KeyPair {
                xpriv: None,
                xpub: account_xpub,
            },
            external: KeyPair {
                xpriv: None,
                xpub: external_xpub,
            },
            internal: KeyPair {
                xpriv: None,
                xpub: internal_xpub,
            },
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn path(&self) -> String {
        self.path.to_string()
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    pub fn is_segwit(&self) -> bool {
        self.segwit
    }

    pub fn is_private(&self) -> bool {
        self.root.xpriv.is_some()
    }

    pub fn mnemonic(&self) -> Option<&str> {
        self.mnemonic.as_deref()
    }

    pub fn root_xpriv(&self) -> Option<String> {
        self.root.xpriv.as_ref().map(|k| k.to_string())
    }

    pub fn root_xpub(&self) -> String {
        self.root.xpub.to_string()
    }

    pub fn account_xpub(&self) -> String {
        self.account.xpub.to_string()
    }

    /// Receiving and change address lists, each `gap_limit` long. Derivation
    /// over the index range is pure and runs in parallel; results keep index
    /// order.
    pub fn addresses(&self) -> Result<(Vec<String>, Vec<String>)> {
        let external = self.chain_addresses(&self.external)?;
        let internal = self.chain_addresses(&self.internal)?;
        Ok((external, internal))
    }

    /// WIF-encoded private keys matching `addresses()`, signing wallets only.
    pub fn wif_keys(&self) -> Result<(Vec<String>, Vec<String>)> {
        let external = self.chain_wifs(&self.external)?;
        let internal = self.chain_wifs(&self.internal)?;
        Ok((external, internal))
    }

    /// Stable zip of the flattened address and WIF lists, external chain
    /// first, index order within each chain.
    pub fn address_wif_pairs(&self) -> Result<Vec<(String, String)>> {
        let (ext_addrs, int_addrs) = self.addresses()?;
        let (ext_wifs, int_wifs) = self.wif_keys()?;
        Ok(ext_addrs
            .into_iter()
            .chain(int_addrs)
            .zip(ext_wifs.into_iter().chain(int_wifs))
            .collect())
    }

    fn chain_addresses(&self, chain: &KeyPair) -> Result<Vec<String>> {
        let secp = Secp256k1::new();
        (0..self.gap_limit)
            .into_par_iter()
            .map(|index| {
                let child = chain
                    .xpub
                    .derive_pub(&secp, &[ChildNumber::Normal { index }])
                    .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
                Ok(self.address_of(child.to_pub()).to_string())
            })
            .collect()
    }

    fn chain_wifs(&self, chain: &KeyPair) -> Result<Vec<String>> {
        let xpriv = chain.xpriv.as_ref().ok_or(Error::WatchOnly)?;
        let secp = Secp256k1::new();
        (0..self.gap_limit)
            .into_par_iter()
            .map(|index| {
                let child = xpriv
                    .derive_priv(&secp, &[ChildNumber::Normal { index }])
                    .map_err(|e| Error::InvalidPath(format!("derivation failed: {}", e)))?;
                Ok(child.to_priv().to_wif())
            })
            .collect()
    }

    fn address_of(&self, pk: CompressedPublicKey) -> Address {
        if self.segwit {
            Address::p2shwpkh(&pk, self.network)
        } else {
            Address::p2pkh(&pk, self.network)
        }
    }
}

impl Drop for HdAccount {
    fn drop(&mut self) {
        self.root.erase();
        self.account.erase();
        self.external.erase();
        self.internal.erase();
    }
}

/// Master private key per BIP32 (HMAC-SHA512 over the seed).
pub fn master_key_from_seed(seed: &[u8], network: Network) -> Result<Xpriv> {
    Xpriv::new_master(network, seed)
        .map_err(|e| Error::InvalidExtendedKey(format!("bad seed: {}", e)))
}

fn check_network(kind: NetworkKind, network: Network) -> Result<()> {
    if kind != NetworkKind::from(network) {
        return Err(Error::InvalidExtendedKey(format!(
            "key network {:?} does not match wallet network {}",
            kind, network
        )));
    }
    Ok(())
}

/// Pure validator for extended-key text: parses as either side of
/// {mainnet, testnet} x {public, private}.
pub fn check_extended_key(text: &str, allow_testnet: bool) -> bool {
    let kind = if let Ok(xpriv) = text.parse::<Xpriv>() {
        xpriv.network
    } else if let Ok(xpub) = text.parse::<Xpub>() {
        xpub.network
    } else {
        return false;
    };
    allow_testnet || kind == NetworkKind::Main
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str =
        "lion harvest elbow beauty butter spirit park jungle dose need flock hobby";
    const MASTER_XPRIV: &str = "xprv9s21ZrQH143K2y2XuR7mBAo1G6D8e558rHj3xndKigQTdKbbDRAL2ynVNUwPLwHAk8wqH8peAMT5ujVTwzU9XdBsRyK8kshnUBAJTWCNqub";

    fn legacy_account() -> HdAccount {
        HdAccount::from_mnemonic(MNEMONIC, "", "0", 1, false, Network::Bitcoin).unwrap()
    }

    #[test]
    fn test_master_key_from_mnemonic() {
        let account = legacy_account();
        assert_eq!(account.root_xpriv().unwrap(), MASTER_XPRIV);
        assert!(account.is_private());
        assert!(!account.is_segwit());
        assert_eq!(account.path(), "m/0");
        assert_eq!(account.mnemonic(), Some(MNEMONIC));
    }

    #[test]
    fn test_legacy_addresses_and_wifs() {
        let account = legacy_account();
        let (receiving, change) = account.addresses().unwrap();
        assert_eq!(receiving, vec!["1E9emJj63vhNNzVLNDAHHbiTQgdF6dzG83"]);
        assert_eq!(change, vec!["1PphWYsNrphT3KMXntE4D5U896oYKyQbWp"]);

        let (wifs, _) = account.wif_keys().unwrap();
        assert_eq!(
            wifs,
            vec!["L4XqkXusVoxrNH91cQrCDXbJLJ3ThvJXvecMAnzPfnL3pXPeSDt2"]
        );
    }

    #[test]
    fn test_segwit_addresses() {
        let account =
            HdAccount::from_mnemonic(MNEMONIC, "", "49'/0'/0'", 1, true, Network::Bitcoin).unwrap();
        let (receiving, _) = account.addresses().unwrap();
        assert_eq!(receiving, vec!["3CcNeJbf3umiAJbWDQU7s444PATicEfxr8"]);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = legacy_account();
        let b = legacy_account();
        assert_eq!(a.account_xpub(), b.account_xpub());
        assert_eq!(a.addresses().unwrap(), b.addresses().unwrap());
    }

    #[test]
    fn test_gap_limit_controls_list_length() {
        let account =
            HdAccount::from_mnemonic(MNEMONIC, "", "0", 5, false, Network::Bitcoin).unwrap();
        let (receiving, change) = account.addresses().unwrap();
        assert_eq!(receiving.len(), 5);
        assert_eq!(change.len(), 5);
        // index 0 is unaffected by widening the gap
        assert_eq!(receiving[0], "1E9emJj63vhNNzVLNDAHHbiTQgdF6dzG83");
    }

    #[test]
    fn test_watch_only_from_account_xpub() {
        let private = legacy_account();
        let watch =
            HdAccount::from_extended_key(&private.root_xpub(), "0", 1, false, Network::Bitcoin)
                .unwrap();
        assert!(!watch.is_private());
        assert_eq!(watch.addresses().unwrap(), private.addresses().unwrap());
        assert!(matches!(watch.wif_keys(), Err(Error::WatchOnly)));
        assert!(matches!(watch.address_wif_pairs(), Err(Error::WatchOnly)));
    }

    #[test]
    fn test_hardened_path_from_public_key_rejected() {
        let private = legacy_account();
        let result =
            HdAccount::from_extended_key(&private.root_xpub(), "44'/0'", 1, false, Network::Bitcoin);
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_network_mismatch_rejected() {
        let result =
            HdAccount::from_extended_key(MASTER_XPRIV, "0", 1, false, Network::Testnet);
        assert!(matches!(result, Err(Error::InvalidExtendedKey(_))));
    }

    #[test]
    fn test_address_wif_pairs_order() {
        let account =
            HdAccount::from_mnemonic(MNEMONIC, "", "0", 2, false, Network::Bitcoin).unwrap();
        let pairs = account.address_wif_pairs().unwrap();
        let (receiving, change) = account.addresses().unwrap();
        let flattened: Vec<String> = pairs.iter().map(|(addr, _)| addr.clone()).collect();
        let expected: Vec<String> = receiving.into_iter().chain(change).collect();
        assert_eq!(flattened, expected);
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_check_extended_key() {
        assert!(check_extended_key(MASTER_XPRIV, false));
        let xpub = legacy_account().root_xpub();
        assert!(check_extended_key(&xpub, false));
        assert!(!check_extended_key("xprv-not-a-key", true));
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let result = HdAccount::from_mnemonic(
            "lion lion lion lion lion lion lion lion lion lion lion lion",
            "",
            "0",
            1,
            false,
            Network::Bitcoin,
        );
        assert!(matches!(result, Err(Error::InvalidMnemonic(_))));
    }
}
