//! ECDSA signatures over sighash digests, and re-verification of signed inputs.

use super::encode::{Transaction, TxOut};
use super::sighash::{self, p2wpkh_script_code, SighashCache, SIGHASH_ALL};
use crate::address::payment::{hash160, parse_pushes, ScriptKind};
use crate::error::{Result, WalletError};
use crate::keys::secp;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, SecretKey};

/// Low-S DER signature over `digest` with the sighash byte appended.
pub fn sign_digest(digest: &[u8; 32], secret: &SecretKey, sighash_type: u32) -> Vec<u8> {
    let mut sig = secp().sign_ecdsa(&Message::from_digest(*digest), secret);
    sig.normalize_s();
    let der = sig.serialize_der();
    let mut out = Vec::with_capacity(der.len() + 1);
    out.extend_from_slice(&der);
    out.push(sighash_type as u8);
    out
}

/// Check a DER+sighash-byte signature against `pubkey`. Returns the sighash type.
pub fn verify_signature(digest: &[u8; 32], signature: &[u8], pubkey: &[u8]) -> Result<u32> {
    let (sighash_byte, der) = signature
        .split_last()
        .ok_or_else(|| WalletError::Signing("empty signature".into()))?;
    let sig = Signature::from_der(der).map_err(|e| WalletError::Signing(format!("malformed signature: {}", e)))?;
    let key = PublicKey::from_slice(pubkey).map_err(|e| WalletError::Signing(format!("malformed public key: {}", e)))?;
    secp()
        .verify_ecdsa(&Message::from_digest(*digest), &sig, &key)
        .map_err(|_| WalletError::Signing("signature does not verify".into()))?;
    Ok(*sighash_byte as u32)
}

/// Digest input `index` of `tx` commits to, given the script it spends.
///
/// For P2SH only the P2SH-P2WPKH shape is understood; `redeem_script` must
/// be the witness program pushed by the scriptSig.
pub fn input_digest(
    cache: &SighashCache<'_>,
    tx: &Transaction,
    index: usize,
    prevout: &TxOut,
    redeem_script: Option<&[u8]>,
) -> Result<[u8; 32]> {
    match ScriptKind::classify(&prevout.script_pubkey) {
        ScriptKind::P2wpkh(hash) => cache.segwit_v0(index, &p2wpkh_script_code(&hash), prevout.value, SIGHASH_ALL),
        ScriptKind::P2sh(script_hash) => {
            let redeem = redeem_script.ok_or_else(|| WalletError::Signing(format!("input {} lacks a redeem script", index)))?;
            if hash160(redeem) != script_hash {
                return Err(WalletError::Signing(format!("input {} redeem script does not match its output", index)));
            }
            match ScriptKind::classify(redeem) {
                ScriptKind::P2wpkh(hash) => cache.segwit_v0(index, &p2wpkh_script_code(&hash), prevout.value, SIGHASH_ALL),
                _ => Err(WalletError::Signing(format!("input {} redeem script is not P2WPKH", index))),
            }
        }
        ScriptKind::P2pkh(_) => sighash::legacy(tx, index, &prevout.script_pubkey, SIGHASH_ALL),
        _ => Err(WalletError::Signing(format!("input {} spends an unsupported script", index))),
    }
}

fn expect_key(index: usize, pubkey: &[u8], hash: &[u8; 20]) -> Result<()> {
    if hash160(pubkey) != *hash {
        return Err(WalletError::Signing(format!("input {} public key does not match the spent output", index)));
    }
    Ok(())
}

fn signature_and_key(index: usize, items: &[Vec<u8>]) -> Result<(&[u8], &[u8])> {
    match items {
        [sig, key] => Ok((sig, key)),
        _ => Err(WalletError::Signing(format!("input {} expects [signature, pubkey], got {} items", index, items.len()))),
    }
}

/// Re-verify every input of a signed transaction against the outputs it spends.
pub fn verify_signed(tx: &Transaction, prevouts: &[TxOut]) -> Result<()> {
    if prevouts.len() != tx.inputs.len() {
        return Err(WalletError::Signing(format!(
            "{} inputs but {} previous outputs",
            tx.inputs.len(),
            prevouts.len()
        )));
    }
    let cache = SighashCache::new(tx);
    for (index, (input, prevout)) in tx.inputs.iter().zip(prevouts).enumerate() {
        let pushes = parse_pushes(&input.script_sig)
            .ok_or_else(|| WalletError::Signing(format!("input {} scriptSig is not push-only", index)))?;
        let (sig, key, redeem) = match ScriptKind::classify(&prevout.script_pubkey) {
            ScriptKind::P2wpkh(hash) => {
                if !pushes.is_empty() {
                    return Err(WalletError::Signing(format!("input {} has a scriptSig on a native segwit spend", index)));
                }
                let (sig, key) = signature_and_key(index, &input.witness)?;
                expect_key(index, key, &hash)?;
                (sig, key, None)
            }
            ScriptKind::P2sh(_) => {
                let redeem = match pushes.as_slice() {
                    [redeem] => redeem.as_slice(),
                    _ => return Err(WalletError::Signing(format!("input {} scriptSig must push only the redeem script", index))),
                };
                let (sig, key) = signature_and_key(index, &input.witness)?;
                if let ScriptKind::P2wpkh(hash) = ScriptKind::classify(redeem) {
                    expect_key(index, key, &hash)?;
                }
                (sig, key, Some(redeem))
            }
            ScriptKind::P2pkh(hash) => {
                if !input.witness.is_empty() {
                    return Err(WalletError::Signing(format!("input {} carries a witness on a legacy spend", index)));
                }
                let (sig, key) = signature_and_key(index, &pushes)?;
                expect_key(index, key, &hash)?;
                (sig, key, None)
            }
            _ => return Err(WalletError::Signing(format!("input {} spends an unsupported script", index))),
        };
        let digest = input_digest(&cache, tx, index, prevout, redeem)?;
        let sighash_type = verify_signature(&digest, sig, key)
            .map_err(|e| WalletError::Signing(format!("input {}: {}", index, e)))?;
        if sighash_type != SIGHASH_ALL {
            return Err(WalletError::Signing(format!("input {} uses sighash type {:#x}", index, sighash_type)));
        }
    }
    Ok(())
}
