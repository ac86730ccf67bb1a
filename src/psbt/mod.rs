//! PSBT - watch-only creation, seed-based signing and finalization (BIP174 v0).
//!
//! ```text
//! account xpub ──create_psbt──► Unsigned ──sign_psbt(mnemonic)──► PartiallySigned
//!                                                                      │ finalize_psbt
//!                                                                      ▼
//!                                 broadcast ◄── extract_transaction ── Finalized
//! ```
//!
//! Only the fields this engine produces are modelled; any other key-value
//! pair is carried through untouched in `unknown`.

pub mod codec;
pub mod creator;
pub mod finalizer;
pub mod signer;

pub use creator::{create_psbt, WatchOnlyAccount};
pub use finalizer::{broadcast_psbt, extract_transaction, finalize_and_extract, finalize_psbt};
pub use signer::{sign_psbt, sign_with_master};

use crate::address::payment::{hash160, p2wpkh_script, ScriptKind};
use crate::address::{script_to_address, AddressType};
use crate::config::Network;
use crate::error::{Result, WalletError};
use crate::keys::{DerivationPath, Fingerprint};
use crate::tx::{Transaction, TxOut};
use serde::Serialize;
use std::collections::BTreeMap;

/// Raw key (type byte + key data) → value, for fields we do not interpret.
pub type UnknownMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Derivation {
    pub pubkey: [u8; 33],
    pub fingerprint: Fingerprint,
    pub path: DerivationPath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtInput {
    pub witness_utxo: Option<TxOut>,
    /// Compressed public key → DER signature with sighash byte.
    pub partial_sigs: BTreeMap<[u8; 33], Vec<u8>>,
    pub sighash_type: Option<u32>,
    pub redeem_script: Option<Vec<u8>>,
    pub bip32_derivation: Vec<Bip32Derivation>,
    pub final_script_sig: Option<Vec<u8>>,
    pub final_script_witness: Option<Vec<Vec<u8>>>,
    pub unknown: UnknownMap,
}

impl PsbtInput {
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.is_finalized() || !self.partial_sigs.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtOutput {
    pub bip32_derivation: Vec<Bip32Derivation>,
    pub unknown: UnknownMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PsbtState {
    Unsigned,
    PartiallySigned,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    /// Scripts and witnesses are always empty here.
    pub unsigned_tx: Transaction,
    pub inputs: Vec<PsbtInput>,
    pub outputs: Vec<PsbtOutput>,
    pub unknown: UnknownMap,
}

impl Psbt {
    pub fn from_unsigned_tx(unsigned_tx: Transaction) -> Result<Self> {
        if unsigned_tx.inputs.iter().any(|i| !i.script_sig.is_empty() || !i.witness.is_empty()) {
            return Err(WalletError::InvalidPsbt("unsigned transaction carries scripts".into()));
        }
        Ok(Self {
            inputs: vec![PsbtInput::default(); unsigned_tx.inputs.len()],
            outputs: vec![PsbtOutput::default(); unsigned_tx.outputs.len()],
            unsigned_tx,
            unknown: UnknownMap::new(),
        })
    }

    pub fn state(&self) -> PsbtState {
        if !self.inputs.is_empty() && self.inputs.iter().all(PsbtInput::is_finalized) {
            PsbtState::Finalized
        } else if self.inputs.iter().any(PsbtInput::is_signed) {
            PsbtState::PartiallySigned
        } else {
            PsbtState::Unsigned
        }
    }

    /// Previous output of input `index`, required for every input we sign.
    pub fn spent_output(&self, index: usize) -> Result<&TxOut> {
        self.inputs
            .get(index)
            .and_then(|i| i.witness_utxo.as_ref())
            .ok_or_else(|| WalletError::InvalidPsbt(format!("input {} has no witness UTXO", index)))
    }

    /// Inputs minus outputs. `None` if any input value is unknown.
    pub fn fee(&self) -> Option<u64> {
        let inputs: Option<u64> = self.inputs.iter().map(|i| i.witness_utxo.as_ref().map(|u| u.value)).sum();
        let outputs: u64 = self.unsigned_tx.outputs.iter().map(|o| o.value).sum();
        inputs?.checked_sub(outputs)
    }

    pub fn txid(&self) -> String {
        self.unsigned_tx.txid()
    }

    pub fn to_base64(&self) -> String {
        codec::to_base64(self)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        codec::from_base64(encoded)
    }
}

/// Script type of an input spent by `pubkey`, if its output commits to that key.
/// Only the segwit forms are spendable from a PSBT here.
pub(crate) fn spend_type(prevout: &TxOut, redeem_script: Option<&[u8]>, pubkey: &[u8; 33]) -> Option<AddressType> {
    let pubkey_hash = hash160(pubkey);
    match ScriptKind::classify(&prevout.script_pubkey) {
        ScriptKind::P2wpkh(hash) if hash == pubkey_hash => Some(AddressType::Bech32),
        ScriptKind::P2sh(script_hash) => {
            let redeem = redeem_script?;
            (hash160(redeem) == script_hash && redeem == p2wpkh_script(&pubkey_hash).as_slice()).then_some(AddressType::Segwit)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsbtInputDetails {
    pub txid: String,
    pub vout: u32,
    pub value_sat: Option<u64>,
    pub address: Option<String>,
    pub derivation_path: Option<DerivationPath>,
    pub master_fingerprint: Option<String>,
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsbtOutputDetails {
    pub value_sat: u64,
    pub address: Option<String>,
    pub script: String,
    pub derivation_path: Option<DerivationPath>,
    pub is_change: bool,
}

/// Human-facing summary of a PSBT, for review before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsbtDetails {
    pub txid: String,
    pub state: PsbtState,
    pub inputs: Vec<PsbtInputDetails>,
    pub outputs: Vec<PsbtOutputDetails>,
    pub fee_sat: Option<u64>,
}

impl PsbtDetails {
    pub fn from_psbt(psbt: &Psbt, network: Network) -> Self {
        let inputs = psbt
            .unsigned_tx
            .inputs
            .iter()
            .zip(&psbt.inputs)
            .map(|(txin, input)| {
                let derivation = input.bip32_derivation.first();
                PsbtInputDetails {
                    txid: txin.previous_output.txid_hex(),
                    vout: txin.previous_output.vout,
                    value_sat: input.witness_utxo.as_ref().map(|u| u.value),
                    address: input.witness_utxo.as_ref().and_then(|u| script_to_address(&u.script_pubkey, network)),
                    derivation_path: derivation.map(|d| d.path.clone()),
                    master_fingerprint: derivation.map(|d| hex::encode(d.fingerprint)),
                    signed: input.is_signed(),
                }
            })
            .collect();
        let outputs = psbt
            .unsigned_tx
            .outputs
            .iter()
            .zip(&psbt.outputs)
            .map(|(txout, output)| {
                let derivation = output.bip32_derivation.first();
                PsbtOutputDetails {
                    value_sat: txout.value,
                    address: script_to_address(&txout.script_pubkey, network),
                    script: hex::encode(&txout.script_pubkey),
                    derivation_path: derivation.map(|d| d.path.clone()),
                    is_change: derivation.is_some(),
                }
            })
            .collect();
        Self { txid: psbt.txid(), state: psbt.state(), inputs, outputs, fee_sat: psbt.fee() }
    }
}

pub fn parse_psbt_details(encoded: &str, network: Network) -> Result<PsbtDetails> {
    Ok(PsbtDetails::from_psbt(&Psbt::from_base64(encoded)?, network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{OutPoint, TxIn};

    fn sample() -> Psbt {
        let tx = Transaction::new(
            vec![
                TxIn::unsigned(OutPoint { txid: [1; 32], vout: 0 }),
                TxIn::unsigned(OutPoint { txid: [2; 32], vout: 3 }),
            ],
            vec![TxOut { value: 7_000, script_pubkey: vec![0x00, 0x14, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9] }],
        );
        Psbt::from_unsigned_tx(tx).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut psbt = sample();
        assert_eq!(psbt.state(), PsbtState::Unsigned);
        psbt.inputs[0].partial_sigs.insert([2; 33], vec![0x30, 0x01]);
        assert_eq!(psbt.state(), PsbtState::PartiallySigned);
        psbt.inputs[0].final_script_witness = Some(vec![vec![1], vec![2]]);
        assert_eq!(psbt.state(), PsbtState::PartiallySigned);
        psbt.inputs[1].final_script_sig = Some(vec![0x16]);
        assert_eq!(psbt.state(), PsbtState::Finalized);
    }

    #[test]
    fn test_fee_needs_every_input_value() {
        let mut psbt = sample();
        assert_eq!(psbt.fee(), None);
        psbt.inputs[0].witness_utxo = Some(TxOut { value: 5_000, script_pubkey: vec![] });
        assert_eq!(psbt.fee(), None);
        psbt.inputs[1].witness_utxo = Some(TxOut { value: 2_500, script_pubkey: vec![] });
        assert_eq!(psbt.fee(), Some(500));
        assert!(psbt.spent_output(1).is_ok());
        assert!(psbt.spent_output(2).is_err());
    }

    #[test]
    fn test_rejects_scripted_unsigned_tx() {
        let mut tx = sample().unsigned_tx;
        tx.inputs[0].script_sig = vec![0x51];
        assert!(matches!(Psbt::from_unsigned_tx(tx), Err(WalletError::InvalidPsbt(_))));
    }

    #[test]
    fn test_details_mark_change_by_derivation() {
        let mut psbt = sample();
        psbt.outputs[0].bip32_derivation.push(Bip32Derivation {
            pubkey: [2; 33],
            fingerprint: [0x73, 0xc5, 0xda, 0x0a],
            path: "m/84'/0'/0'/1/0".parse().unwrap(),
        });
        let details = PsbtDetails::from_psbt(&psbt, Network::Bitcoin);
        assert_eq!(details.state, PsbtState::Unsigned);
        assert!(details.outputs[0].is_change);
        assert!(details.outputs[0].address.as_deref().unwrap().starts_with("bc1q"));
        assert_eq!(details.inputs[1].vout, 3);
        assert!(!details.inputs[0].signed);
    }
}
