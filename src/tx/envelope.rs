//! Transaction export/import envelope.
//!
//! The exported object is UTF-8 JSON `{"txn": "<hex>", "hash": "<hex>"}`
//! where `txn` frames an explicit serialization of the builder state and
//! `hash` is SHA-512 over that blob concatenated with the exporting wallet's
//! account xpub. The binding is a guard against importing a transaction into
//! the wrong wallet, not an authenticator: there is no secret key involved.

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::api::Utxo;
use crate::error::{Error, Result};
use crate::tx::builder::TransactionBuilder;
use crate::tx::chooser::SelectionPolicy;

pub const EXPORT_VERSION: u8 = 1;

/// File extension used for exported envelopes.
pub const FILE_EXTENSION: &str = "txn";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    txn: String,
    hash: String,
}

/// Everything needed to reconstruct the builder on the importing side.
#[derive(Debug, Serialize, Deserialize)]
struct ExportedTransaction {
    version: u8,
    signed: bool,
    /// Consensus-serialized transaction (BIP141 framing when witnesses are
    /// present), hex.
    raw: String,
    inputs: Vec<Utxo>,
    outputs: Vec<(String, u64)>,
    change_address: String,
    fee: u64,
    locktime: u32,
    segwit: bool,
    policy: SelectionPolicy,
}

/// Serializes a built transaction, binding it to `account_xpub`.
pub fn export(builder: &TransactionBuilder, account_xpub: &str) -> Result<String> {
    let payload = ExportedTransaction {
        version: EXPORT_VERSION,
        signed: builder.is_signed(),
        raw: builder.raw_hex(),
        inputs: builder.chosen_utxos().to_vec(),
        outputs: builder.requested_outputs().to_vec(),
        change_address: builder.change_address().to_string(),
        fee: builder.fee(),
        locktime: builder.locktime(),
        segwit: builder.is_segwit(),
        policy: builder.policy(),
    };
    let blob = serde_json::to_vec(&payload)
        .map_err(|e| Error::Store(format!("export serialization failed: {}", e)))?;
    let envelope = Envelope {
        txn: hex::encode(&blob),
        hash: binding_hash(&blob, account_xpub),
    };
    serde_json::to_string(&envelope)
        .map_err(|e| Error::Store(format!("export serialization failed: {}", e)))
}

/// Parses an envelope and verifies its binding against *this* wallet's
/// account xpub before reconstructing the builder.
pub fn import(text: &str, account_xpub: &str, network: Network) -> Result<TransactionBuilder> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|_| Error::InvalidImport("missing txn or hash key".to_string()))?;
    let blob = hex::decode(&envelope.txn)
        .map_err(|_| Error::InvalidImport("txn is not valid hex".to_string()))?;

    if binding_hash(&blob, account_xpub) != envelope.hash {
        return Err(Error::InvalidImport(
            "hash does not match this wallet's account xpub".to_string(),
        ));
    }

    let payload: ExportedTransaction = serde_json::from_slice(&blob)
        .map_err(|e| Error::InvalidImport(format!("bad payload: {}", e)))?;
    if payload.version != EXPORT_VERSION {
        return Err(Error::InvalidImport(format!(
            "unsupported export version {}",
            payload.version
        )));
    }
    let raw = hex::decode(&payload.raw)
        .map_err(|_| Error::InvalidImport("raw transaction is not valid hex".to_string()))?;
    let transaction = bitcoin::consensus::encode::deserialize(&raw)
        .map_err(|e| Error::InvalidImport(format!("bad raw transaction: {}", e)))?;

    TransactionBuilder::from_parts(
        network,
        payload.inputs,
        payload.outputs,
        payload.change_address,
        payload.fee,
        payload.segwit,
        payload.locktime,
        payload.policy,
        transaction,
        payload.signed,
    )
}

fn binding_hash(blob: &[u8], account_xpub: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(blob);
    hasher.update(account_xpub.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_0: &str = "1E9emJj63vhNNzVLNDAHHbiTQgdF6dzG83";
    const ADDR_1: &str = "17QkJ9ZFEcRuub5Pj5LwjDNteyTkWirv6t";
    const CHANGE: &str = "1PphWYsNrphT3KMXntE4D5U896oYKyQbWp";
    const XPUB_A: &str = "account-xpub-wallet-a";
    const XPUB_B: &str = "account-xpub-wallet-b";

    fn builder() -> TransactionBuilder {
        TransactionBuilder::build(
            Network::Bitcoin,
            vec![Utxo {
                txid: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                    .to_string(),
                output_index: 0,
                address: ADDR_0.to_string(),
                script: String::new(),
                value: 60_074,
                confirmations: 3,
            }],
            vec![(ADDR_1.to_string(), 21_533)],
            CHANGE.to_string(),
            2_142,
            false,
            0,
            SelectionPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_roundtrip_same_wallet() {
        let original = builder();
        let exported = export(&original, XPUB_A).unwrap();
        let imported = import(&exported, XPUB_A, Network::Bitcoin).unwrap();

        assert_eq!(imported.raw_hex(), original.raw_hex());
        assert_eq!(imported.fee(), original.fee());
        assert_eq!(imported.change_amount(), original.change_amount());
        assert_eq!(imported.input_addresses(), original.input_addresses());
        assert_eq!(imported.is_signed(), original.is_signed());
    }

    #[test]
    fn test_import_into_other_wallet_rejected() {
        let exported = export(&builder(), XPUB_A).unwrap();
        assert!(matches!(
            import(&exported, XPUB_B, Network::Bitcoin),
            Err(Error::InvalidImport(_))
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let exported = export(&builder(), XPUB_A).unwrap();
        let mut envelope: serde_json::Value = serde_json::from_str(&exported).unwrap();
        let txn = envelope["txn"].as_str().unwrap().to_string();
        let flipped = if txn.starts_with('a') { "b" } else { "a" };
        envelope["txn"] = serde_json::Value::String(format!("{}{}", flipped, &txn[1..]));
        assert!(matches!(
            import(&envelope.to_string(), XPUB_A, Network::Bitcoin),
            Err(Error::InvalidImport(_))
        ));
    }

    #[test]
    fn test_missing_keys_rejected() {
        assert!(matches!(
            import(r#"{"txn": "00"}"#, XPUB_A, Network::Bitcoin),
            Err(Error::InvalidImport(_))
        ));
        assert!(matches!(
            import("not json", XPUB_A, Network::Bitcoin),
            Err(Error::InvalidImport(_))
        ));
    }
}
