//! Payment encoders: public key → output script → address, and back.

use super::AddressType;
use crate::config::Network;
use crate::encoding::base58;
use crate::error::{Result, WalletError};
use bitcoin::bech32::{segwit, Hrp};
use bitcoin::hashes::{hash160, Hash};

const OP_0: u8 = 0x00;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;

pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// One implementation per script type; pick it with [`AddressType::payment`].
pub trait Payment: Send + Sync {
    fn address_type(&self) -> AddressType;

    fn script_pubkey(&self, pubkey: &[u8; 33]) -> Vec<u8>;

    fn address(&self, pubkey: &[u8; 33], network: Network) -> Result<String> {
        script_to_address(&self.script_pubkey(pubkey), network)
            .ok_or_else(|| WalletError::InvalidAddress("unencodable output script".into()))
    }

    /// Whether inputs of this type sign with the BIP143 digest.
    fn is_segwit(&self) -> bool;

    /// Redeem script committed to by a P2SH output.
    fn redeem_script(&self, _pubkey: &[u8; 33]) -> Option<Vec<u8>> {
        None
    }

    /// `(scriptSig, witness)` spending this output with `signature` (DER + sighash byte).
    fn unlock(&self, signature: &[u8], pubkey: &[u8; 33]) -> (Vec<u8>, Vec<Vec<u8>>);
}

pub struct P2pkh;
pub struct P2shP2wpkh;
pub struct P2wpkh;

impl Payment for P2pkh {
    fn address_type(&self) -> AddressType { AddressType::Legacy }

    fn script_pubkey(&self, pubkey: &[u8; 33]) -> Vec<u8> {
        p2pkh_script(&hash160(pubkey))
    }

    fn is_segwit(&self) -> bool { false }

    fn unlock(&self, signature: &[u8], pubkey: &[u8; 33]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut script_sig = Vec::with_capacity(signature.len() + 35);
        push_data(&mut script_sig, signature);
        push_data(&mut script_sig, pubkey);
        (script_sig, Vec::new())
    }
}

impl Payment for P2shP2wpkh {
    fn address_type(&self) -> AddressType { AddressType::Segwit }

    fn script_pubkey(&self, pubkey: &[u8; 33]) -> Vec<u8> {
        p2sh_script(&hash160(&p2wpkh_script(&hash160(pubkey))))
    }

    fn is_segwit(&self) -> bool { true }

    fn redeem_script(&self, pubkey: &[u8; 33]) -> Option<Vec<u8>> {
        Some(p2wpkh_script(&hash160(pubkey)))
    }

    fn unlock(&self, signature: &[u8], pubkey: &[u8; 33]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut script_sig = Vec::with_capacity(23);
        push_data(&mut script_sig, &p2wpkh_script(&hash160(pubkey)));
        (script_sig, vec![signature.to_vec(), pubkey.to_vec()])
    }
}

impl Payment for P2wpkh {
    fn address_type(&self) -> AddressType { AddressType::Bech32 }

    fn script_pubkey(&self, pubkey: &[u8; 33]) -> Vec<u8> {
        p2wpkh_script(&hash160(pubkey))
    }

    fn is_segwit(&self) -> bool { true }

    fn unlock(&self, signature: &[u8], pubkey: &[u8; 33]) -> (Vec<u8>, Vec<Vec<u8>>) {
        (Vec::new(), vec![signature.to_vec(), pubkey.to_vec()])
    }
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 20]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

pub fn p2wpkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.extend_from_slice(&[OP_0, 20]);
    script.extend_from_slice(pubkey_hash);
    script
}

pub fn p2wsh_script(script_hash: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(&[OP_0, 32]);
    script.extend_from_slice(script_hash);
    script
}

/// Minimal push of `data` onto a script.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        len @ 0..=75 => script.push(len as u8),
        len @ 76..=255 => script.extend_from_slice(&[OP_PUSHDATA1, len as u8]),
        len => {
            script.push(0x4d);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Split a push-only script into its pushed items. `None` for any non-push opcode.
pub fn parse_pushes(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        let len = match op {
            0x00..=0x4b => op as usize,
            OP_PUSHDATA1 => {
                let len = *script.get(i)? as usize;
                i += 1;
                len
            }
            0x4d => {
                let len = u16::from_le_bytes([*script.get(i)?, *script.get(i + 1)?]) as usize;
                i += 2;
                len
            }
            _ => return None,
        };
        items.push(script.get(i..i + len)?.to_vec());
        i += len;
    }
    Some(items)
}

/// Output script templates the engine can render as addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    P2pkh([u8; 20]),
    P2sh([u8; 20]),
    P2wpkh([u8; 20]),
    P2wsh([u8; 32]),
    Unknown,
}

impl ScriptKind {
    pub fn classify(script: &[u8]) -> Self {
        match script {
            [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
                ScriptKind::P2pkh(to_array(hash))
            }
            [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == 20 => ScriptKind::P2sh(to_array(hash)),
            [OP_0, 20, hash @ ..] if hash.len() == 20 => ScriptKind::P2wpkh(to_array(hash)),
            [OP_0, 32, hash @ ..] if hash.len() == 32 => ScriptKind::P2wsh(to_array(hash)),
            _ => ScriptKind::Unknown,
        }
    }
}

fn to_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn network_hrp(network: Network) -> Option<Hrp> {
    Hrp::parse(network.bech32_hrp()).ok()
}

fn base58_address(prefix: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    base58::encode_check(&payload)
}

/// Render an output script as an address (history display, PSBT decoding).
pub fn script_to_address(script: &[u8], network: Network) -> Option<String> {
    match ScriptKind::classify(script) {
        ScriptKind::P2pkh(hash) => Some(base58_address(network.p2pkh_prefix(), &hash)),
        ScriptKind::P2sh(hash) => Some(base58_address(network.p2sh_prefix(), &hash)),
        ScriptKind::P2wpkh(hash) => segwit::encode(network_hrp(network)?, segwit::VERSION_0, &hash).ok(),
        ScriptKind::P2wsh(hash) => segwit::encode(network_hrp(network)?, segwit::VERSION_0, &hash).ok(),
        ScriptKind::Unknown => None,
    }
}

/// Output script paying to `address` on `network`.
pub fn address_to_script(address: &str, network: Network) -> Result<Vec<u8>> {
    let address = address.trim();
    let hrp = network.bech32_hrp();
    let is_bech32 = address
        .get(..hrp.len() + 1)
        .map(|head| head.eq_ignore_ascii_case(&format!("{}1", hrp)))
        .unwrap_or(false);
    if is_bech32 {
        let (decoded_hrp, version, program) =
            segwit::decode(address).map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?;
        if decoded_hrp.to_lowercase() != hrp {
            return Err(WalletError::InvalidAddress(format!("{} is not a {} address", address, network.as_str())));
        }
        if version != segwit::VERSION_0 {
            return Err(WalletError::InvalidAddress(format!("unsupported witness version in {}", address)));
        }
        return match program.len() {
            20 => Ok(p2wpkh_script(&to_array(&program))),
            32 => Ok(p2wsh_script(&to_array(&program))),
            n => Err(WalletError::InvalidAddress(format!("bad witness program length {}", n))),
        };
    }

    let payload = base58::decode_check(address).map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?;
    if payload.len() != 21 {
        return Err(WalletError::InvalidAddress(format!("{}: bad payload length {}", address, payload.len())));
    }
    let hash: [u8; 20] = to_array(&payload[1..]);
    match payload[0] {
        p if p == network.p2pkh_prefix() => Ok(p2pkh_script(&hash)),
        p if p == network.p2sh_prefix() => Ok(p2sh_script(&hash)),
        p => Err(WalletError::InvalidAddress(format!(
            "{}: version byte {:#04x} is not valid on {}",
            address,
            p,
            network.as_str()
        ))),
    }
}

pub fn validate_address(address: &str, network: Network) -> bool {
    address_to_script(address, network).is_ok()
}
