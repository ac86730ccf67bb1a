//! BIP174 version 0 binary layout and its base64 text form.

use super::{Bip32Derivation, Psbt, PsbtInput, PsbtOutput, UnknownMap};
use crate::error::{Result, WalletError};
use crate::keys::DerivationPath;
use crate::tx::encode::{write_bytes, write_varint, Reader};
use crate::tx::{Transaction, TxOut};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashSet;

const MAGIC: &[u8; 5] = b"psbt\xff";

const GLOBAL_UNSIGNED_TX: u8 = 0x00;
const GLOBAL_VERSION: u8 = 0xfb;

const IN_WITNESS_UTXO: u8 = 0x01;
const IN_PARTIAL_SIG: u8 = 0x02;
const IN_SIGHASH_TYPE: u8 = 0x03;
const IN_REDEEM_SCRIPT: u8 = 0x04;
const IN_BIP32_DERIVATION: u8 = 0x06;
const IN_FINAL_SCRIPTSIG: u8 = 0x07;
const IN_FINAL_SCRIPTWITNESS: u8 = 0x08;

const OUT_BIP32_DERIVATION: u8 = 0x02;

fn corrupt(e: WalletError) -> WalletError {
    match e {
        WalletError::Validation(msg) => WalletError::InvalidPsbt(msg),
        other => other,
    }
}

fn write_pair(buf: &mut Vec<u8>, key_type: u8, key_data: &[u8], value: &[u8]) {
    write_varint(buf, 1 + key_data.len() as u64);
    buf.push(key_type);
    buf.extend_from_slice(key_data);
    write_bytes(buf, value);
}

fn write_unknown(buf: &mut Vec<u8>, unknown: &UnknownMap) {
    for (key, value) in unknown {
        write_bytes(buf, key);
        write_bytes(buf, value);
    }
}

fn derivation_value(derivation: &Bip32Derivation) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + 4 * derivation.path.depth());
    value.extend_from_slice(&derivation.fingerprint);
    for index in derivation.path.indices() {
        value.extend_from_slice(&index.to_le_bytes());
    }
    value
}

fn write_input(buf: &mut Vec<u8>, input: &PsbtInput) {
    if let Some(utxo) = &input.witness_utxo {
        write_pair(buf, IN_WITNESS_UTXO, &[], &utxo.serialize());
    }
    for (pubkey, sig) in &input.partial_sigs {
        write_pair(buf, IN_PARTIAL_SIG, pubkey, sig);
    }
    if let Some(sighash) = input.sighash_type {
        write_pair(buf, IN_SIGHASH_TYPE, &[], &sighash.to_le_bytes());
    }
    if let Some(redeem) = &input.redeem_script {
        write_pair(buf, IN_REDEEM_SCRIPT, &[], redeem);
    }
    for derivation in &input.bip32_derivation {
        write_pair(buf, IN_BIP32_DERIVATION, &derivation.pubkey, &derivation_value(derivation));
    }
    if let Some(script_sig) = &input.final_script_sig {
        write_pair(buf, IN_FINAL_SCRIPTSIG, &[], script_sig);
    }
    if let Some(witness) = &input.final_script_witness {
        let mut value = Vec::new();
        write_varint(&mut value, witness.len() as u64);
        for item in witness {
            write_bytes(&mut value, item);
        }
        write_pair(buf, IN_FINAL_SCRIPTWITNESS, &[], &value);
    }
    write_unknown(buf, &input.unknown);
    buf.push(0x00);
}

fn write_output(buf: &mut Vec<u8>, output: &PsbtOutput) {
    for derivation in &output.bip32_derivation {
        write_pair(buf, OUT_BIP32_DERIVATION, &derivation.pubkey, &derivation_value(derivation));
    }
    write_unknown(buf, &output.unknown);
    buf.push(0x00);
}

pub fn serialize(psbt: &Psbt) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    write_pair(&mut buf, GLOBAL_UNSIGNED_TX, &[], &psbt.unsigned_tx.serialize_without_witness());
    write_unknown(&mut buf, &psbt.unknown);
    buf.push(0x00);
    for input in &psbt.inputs {
        write_input(&mut buf, input);
    }
    for output in &psbt.outputs {
        write_output(&mut buf, output);
    }
    buf
}

pub fn to_base64(psbt: &Psbt) -> String {
    STANDARD.encode(serialize(psbt))
}

/// One key-value map up to its 0x00 separator, as `(type, key data, value)`.
fn read_map<'a>(reader: &mut Reader<'a>) -> Result<Vec<(u8, &'a [u8], &'a [u8])>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    loop {
        let key = reader.read_var_bytes().map_err(corrupt)?;
        let Some((&key_type, key_data)) = key.split_first() else {
            return Ok(entries);
        };
        let value = reader.read_var_bytes().map_err(corrupt)?;
        if !seen.insert(key) {
            return Err(WalletError::InvalidPsbt(format!("duplicate key {}", hex::encode(key))));
        }
        entries.push((key_type, key_data, value));
    }
}

fn raw_key(key_type: u8, key_data: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + key_data.len());
    key.push(key_type);
    key.extend_from_slice(key_data);
    key
}

fn no_key_data(key_type: u8, key_data: &[u8]) -> Result<()> {
    if key_data.is_empty() {
        Ok(())
    } else {
        Err(WalletError::InvalidPsbt(format!("key type {:#04x} takes no key data", key_type)))
    }
}

fn compressed_key(key_data: &[u8]) -> Option<[u8; 33]> {
    <[u8; 33]>::try_from(key_data).ok()
}

fn parse_derivation(pubkey: [u8; 33], value: &[u8]) -> Result<Bip32Derivation> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(WalletError::InvalidPsbt(format!("bad BIP32 derivation length {}", value.len())));
    }
    let mut fingerprint = [0u8; 4];
    fingerprint.copy_from_slice(&value[..4]);
    let indices = value[4..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Bip32Derivation { pubkey, fingerprint, path: DerivationPath::from_indices(indices) })
}

fn parse_input(entries: Vec<(u8, &[u8], &[u8])>) -> Result<PsbtInput> {
    let mut input = PsbtInput::default();
    for (key_type, key_data, value) in entries {
        match (key_type, compressed_key(key_data)) {
            (IN_WITNESS_UTXO, _) => {
                no_key_data(key_type, key_data)?;
                input.witness_utxo = Some(TxOut::deserialize(value).map_err(corrupt)?);
            }
            (IN_PARTIAL_SIG, Some(pubkey)) => {
                input.partial_sigs.insert(pubkey, value.to_vec());
            }
            (IN_SIGHASH_TYPE, _) => {
                no_key_data(key_type, key_data)?;
                let bytes = <[u8; 4]>::try_from(value)
                    .map_err(|_| WalletError::InvalidPsbt("sighash type must be 4 bytes".into()))?;
                input.sighash_type = Some(u32::from_le_bytes(bytes));
            }
            (IN_REDEEM_SCRIPT, _) => {
                no_key_data(key_type, key_data)?;
                input.redeem_script = Some(value.to_vec());
            }
            (IN_BIP32_DERIVATION, Some(pubkey)) => {
                input.bip32_derivation.push(parse_derivation(pubkey, value)?);
            }
            (IN_FINAL_SCRIPTSIG, _) => {
                no_key_data(key_type, key_data)?;
                input.final_script_sig = Some(value.to_vec());
            }
            (IN_FINAL_SCRIPTWITNESS, _) => {
                no_key_data(key_type, key_data)?;
                let mut reader = Reader::new(value);
                let count = reader.read_varint().map_err(corrupt)?;
                let mut witness = Vec::new();
                for _ in 0..count {
                    witness.push(reader.read_var_bytes().map_err(corrupt)?.to_vec());
                }
                reader.finish().map_err(corrupt)?;
                input.final_script_witness = Some(witness);
            }
            // Uncompressed keys and fields we do not model
            _ => {
                input.unknown.insert(raw_key(key_type, key_data), value.to_vec());
            }
        }
    }
    Ok(input)
}

fn parse_output(entries: Vec<(u8, &[u8], &[u8])>) -> Result<PsbtOutput> {
    let mut output = PsbtOutput::default();
    for (key_type, key_data, value) in entries {
        match (key_type, compressed_key(key_data)) {
            (OUT_BIP32_DERIVATION, Some(pubkey)) => output.bip32_derivation.push(parse_derivation(pubkey, value)?),
            _ => {
                output.unknown.insert(raw_key(key_type, key_data), value.to_vec());
            }
        }
    }
    Ok(output)
}

pub fn deserialize(bytes: &[u8]) -> Result<Psbt> {
    let mut reader = Reader::new(bytes);
    if reader.read_bytes(MAGIC.len()).ok() != Some(MAGIC.as_slice()) {
        return Err(WalletError::InvalidPsbt("missing magic bytes".into()));
    }

    let mut unsigned_tx = None;
    let mut unknown = UnknownMap::new();
    for (key_type, key_data, value) in read_map(&mut reader)? {
        match key_type {
            GLOBAL_UNSIGNED_TX => {
                no_key_data(key_type, key_data)?;
                let tx = Transaction::deserialize(value).map_err(corrupt)?;
                if tx.has_witness() {
                    return Err(WalletError::InvalidPsbt("unsigned transaction has witnesses".into()));
                }
                unsigned_tx = Some(tx);
            }
            GLOBAL_VERSION if value != [0, 0, 0, 0] => {
                return Err(WalletError::InvalidPsbt("only PSBT version 0 is supported".into()));
            }
            _ => {
                unknown.insert(raw_key(key_type, key_data), value.to_vec());
            }
        }
    }
    let unsigned_tx = unsigned_tx.ok_or_else(|| WalletError::InvalidPsbt("no unsigned transaction".into()))?;

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
    psbt.unknown = unknown;
    for slot in psbt.inputs.iter_mut() {
        *slot = parse_input(read_map(&mut reader)?)?;
    }
    for slot in psbt.outputs.iter_mut() {
        *slot = parse_output(read_map(&mut reader)?)?;
    }
    reader.finish().map_err(corrupt)?;
    Ok(psbt)
}

pub fn from_base64(encoded: &str) -> Result<Psbt> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| WalletError::InvalidPsbt(format!("base64: {}", e)))?;
    deserialize(&bytes)
}
