//! Unsigned transaction assembly and signing.
//!
//! The builder keeps its inputs (candidate UTXO pool, requested outputs, fee)
//! so the transaction can be re-assembled when the fee changes. Signing
//! replaces each input's placeholder script with a P2PKH scriptSig, or with a
//! P2SH-wrapped P2WPKH redeem push plus witness in segwit mode.

use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::key::{CompressedPublicKey, Secp256k1};
use bitcoin::script::{Builder as ScriptBuilder, PushBytesBuf};
use bitcoin::secp256k1::Message;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, EcdsaSighashType, Network, OutPoint, PrivateKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Witness,
};

use crate::api::Utxo;
use crate::error::{Error, Result};
use crate::tx::chooser::{choose_utxos, Selection, SelectionPolicy};

pub struct TransactionBuilder {
    network: Network,
    utxo_pool: Vec<Utxo>,
    outputs: Vec<(String, u64)>,
    change_address: String,
    fee: u64,
    segwit: bool,
    locktime: u32,
    policy: SelectionPolicy,

    selection: Selection,
    transaction: Transaction,
    signed: bool,
}

impl TransactionBuilder {
    /// Assembles an unsigned transaction paying `outputs` plus `fee` out of
    /// `utxo_pool`, returning change to `change_address` when the selection
    /// overshoots. The change address must not appear among the outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        network: Network,
        utxo_pool: Vec<Utxo>,
        outputs: Vec<(String, u64)>,
        change_address: String,
        fee: u64,
        segwit: bool,
        locktime: u32,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        if outputs.iter().any(|(address, _)| *address == change_address) {
            return Err(Error::UnsupportedAddress(
                "change address duplicates an output address".to_string(),
            ));
        }
        let mut builder = Self {
            network,
            utxo_pool,
            outputs,
            change_address,
            fee,
            segwit,
            locktime,
            policy,
            selection: Selection::default(),
            transaction: empty_transaction(locktime),
            signed: false,
        };
        // validate output scripts before spending any selection effort
        for (address, _) in builder.outputs.clone() {
            builder.script_for(&address)?;
        }
        builder.assemble()?;
        Ok(builder)
    }

    fn required(&self) -> Result<u64> {
        self.outputs
            .iter()
            .map(|(_, value)| *value)
            .try_fold(self.fee, u64::checked_add)
            .ok_or_else(|| Error::UnsupportedAddress("output total overflows".to_string()))
    }

    fn assemble(&mut self) -> Result<()> {
        let required = self.required()?;
        let selection = choose_utxos(&self.utxo_pool, required, self.policy)?;

        let mut outputs = self.outputs.clone();
        if selection.change > 0 {
            outputs.push((self.change_address.clone(), selection.change));
        }

        let input = selection
            .utxos
            .iter()
            .map(|utxo| {
                let txid = utxo
                    .txid
                    .parse()
                    .map_err(|e| Error::Parse(format!("bad txid {}: {}", utxo.txid, e)))?;
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid,
                        vout: utxo.output_index,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let output = outputs
            .iter()
            .map(|(address, value)| {
                Ok(TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: self.script_for(address)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.transaction = Transaction {
            version: Version::ONE,
            lock_time: LockTime::from_consensus(self.locktime),
            input,
            output,
        };
        self.selection = selection;
        self.signed = false;
        Ok(())
    }

    /// Output script by address type; the leading character decides between
    /// pay-to-pubkey-hash and pay-to-script-hash.
    fn script_for(&self, address: &str) -> Result<ScriptBuf> {
        let supported = match self.network {
            Network::Bitcoin => address.starts_with('1') || address.starts_with('3'),
            _ => {
                address.starts_with('m') || address.starts_with('n') || address.starts_with('2')
            }
        };
        if !supported {
            return Err(Error::UnsupportedAddress(address.to_string()));
        }
        let parsed = address
            .parse::<Address<_>>()
            .map_err(|_| Error::UnsupportedAddress(address.to_string()))?
            .require_network(self.network)
            .map_err(|_| Error::UnsupportedAddress(address.to_string()))?;
        Ok(parsed.script_pubkey())
    }

    /// Re-prices the transaction: selection and change are recomputed and any
    /// previous signatures are discarded.
    pub fn change_fee(&mut self, new_fee: u64) -> Result<()> {
        self.fee = new_fee;
        self.assemble()
    }

    /// Signs every input with the WIF key of its address. Pick order is
    /// preserved; signing twice is rejected.
    pub fn sign(&mut self, wif_keys: &BTreeMap<String, String>) -> Result<()> {
        if self.signed {
            return Err(Error::AlreadySigned);
        }
        let secp = Secp256k1::new();
        let mut finals: Vec<(ScriptBuf, Witness)> = Vec::with_capacity(self.selection.utxos.len());
        {
            let mut cache = SighashCache::new(&self.transaction);
            for (index, utxo) in self.selection.utxos.iter().enumerate() {
                let wif = wif_keys.get(&utxo.address).ok_or_else(|| {
                    Error::Signing(format!("no key for input address {}", utxo.address))
                })?;
                let privkey = PrivateKey::from_wif(wif)
                    .map_err(|e| Error::Signing(format!("bad wif key: {}", e)))?;
                let pubkey = privkey.public_key(&secp);

                if self.segwit {
                    let compressed = CompressedPublicKey::try_from(pubkey).map_err(|_| {
                        Error::Signing("segwit requires a compressed key".to_string())
                    })?;
                    let witness_script = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
                    let sighash = cache
                        .p2wpkh_signature_hash(
                            index,
                            &witness_script,
                            Amount::from_sat(utxo.value),
                            EcdsaSighashType::All,
                        )
                        .map_err(|e| Error::Signing(format!("sighash failed: {}", e)))?;
                    let signature = secp.sign_ecdsa(
                        &Message::from_digest(sighash.to_byte_array()),
                        &privkey.inner,
                    );
                    let signature = bitcoin::ecdsa::Signature::sighash_all(signature);

                    let redeem = PushBytesBuf::try_from(witness_script.clone().into_bytes())
                        .map_err(|_| Error::Signing("redeem script too long".to_string()))?;
                    let script_sig = ScriptBuilder::new().push_slice(redeem).into_script();
                    finals.push((script_sig, Witness::p2wpkh(&signature, &compressed.0)));
                } else {
                    let script_pubkey = self.script_for(&utxo.address)?;
                    let sighash = cache
                        .legacy_signature_hash(
                            index,
                            &script_pubkey,
                            EcdsaSighashType::All.to_u32(),
                        )
                        .map_err(|e| Error::Signing(format!("sighash failed: {}", e)))?;
                    let signature = secp.sign_ecdsa(
                        &Message::from_digest(sighash.to_byte_array()),
                        &privkey.inner,
                    );
                    let signature = bitcoin::ecdsa::Signature::sighash_all(signature);

                    let sig_push = PushBytesBuf::try_from(signature.to_vec())
                        .map_err(|_| Error::Signing("signature too long".to_string()))?;
                    let script_sig = ScriptBuilder::new()
                        .push_slice(sig_push)
                        .push_key(&pubkey)
                        .into_script();
                    finals.push((script_sig, Witness::new()));
                }
            }
        }
        for (input, (script_sig, witness)) in self.transaction.input.iter_mut().zip(finals) {
            input.script_sig = script_sig;
            input.witness = witness;
        }
        self.signed = true;
        Ok(())
    }

    /// Canonical id: double SHA-256 of the serialized transaction, witness
    /// data stripped.
    pub fn txid(&self) -> String {
        self.transaction.compute_txid().to_string()
    }

    pub fn estimated_size(&self) -> usize {
        self.transaction.total_size()
    }

    pub fn weight(&self) -> u64 {
        self.transaction.weight().to_wu()
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(bitcoin::consensus::encode::serialize(&self.transaction))
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn change_amount(&self) -> u64 {
        self.selection.change
    }

    pub fn input_addresses(&self) -> &[String] {
        &self.selection.input_addresses
    }

    pub fn chosen_utxos(&self) -> &[Utxo] {
        &self.selection.utxos
    }

    pub fn requested_outputs(&self) -> &[(String, u64)] {
        &self.outputs
    }

    pub fn change_address(&self) -> &str {
        &self.change_address
    }

    pub fn is_segwit(&self) -> bool {
        self.segwit
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Rebuilds a builder from previously exported parts; the serialized
    /// transaction is authoritative.
    pub(crate) fn from_parts(
        network: Network,
        utxos: Vec<Utxo>,
        outputs: Vec<(String, u64)>,
        change_address: String,
        fee: u64,
        segwit: bool,
        locktime: u32,
        policy: SelectionPolicy,
        transaction: Transaction,
        signed: bool,
    ) -> Result<Self> {
        if transaction.input.len() != utxos.len() {
            return Err(Error::InvalidImport(
                "input count does not match utxo list".to_string(),
            ));
        }
        let total: u64 = utxos.iter().map(|u| u.value).sum();
        let required = outputs
            .iter()
            .map(|(_, value)| *value)
            .try_fold(fee, u64::checked_add)
            .ok_or_else(|| Error::InvalidImport("output total overflows".to_string()))?;
        if total < required {
            return Err(Error::InvalidImport(
                "inputs do not cover outputs and fee".to_string(),
            ));
        }
        let mut input_addresses = Vec::new();
        for utxo in &utxos {
            if !input_addresses.contains(&utxo.address) {
                input_addresses.push(utxo.address.clone());
            }
        }
        Ok(Self {
            network,
            utxo_pool: utxos.clone(),
            outputs,
            change_address,
            fee,
            segwit,
            locktime,
            policy,
            selection: Selection {
                utxos,
                change: total - required,
                input_addresses,
            },
            transaction,
            signed,
        })
    }
}

fn empty_transaction(locktime: u32) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::from_consensus(locktime),
        input: vec![],
        output: vec![],
    }
}
