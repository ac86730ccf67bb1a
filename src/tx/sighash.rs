//! Signature hashes: BIP143 for segwit v0 inputs, the original algorithm for P2PKH.

use super::encode::{double_sha256, write_bytes, Transaction};
use crate::address::payment::p2pkh_script;
use crate::error::{Result, WalletError};

pub const SIGHASH_ALL: u32 = 0x01;

/// BIP143 scriptCode for a P2WPKH (or P2SH-P2WPKH) spend: the P2PKH template.
pub fn p2wpkh_script_code(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    p2pkh_script(pubkey_hash)
}

/// Per-transaction BIP143 midstate. `hashPrevouts`, `hashSequence` and
/// `hashOutputs` are shared by every input's digest.
pub struct SighashCache<'a> {
    tx: &'a Transaction,
    hash_prevouts: [u8; 32],
    hash_sequence: [u8; 32],
    hash_outputs: [u8; 32],
}

impl<'a> SighashCache<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        let mut prevouts = Vec::with_capacity(tx.inputs.len() * 36);
        let mut sequences = Vec::with_capacity(tx.inputs.len() * 4);
        for input in &tx.inputs {
            prevouts.extend_from_slice(&input.previous_output.txid);
            prevouts.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for output in &tx.outputs {
            output.write(&mut outputs);
        }
        Self {
            tx,
            hash_prevouts: double_sha256(&prevouts),
            hash_sequence: double_sha256(&sequences),
            hash_outputs: double_sha256(&outputs),
        }
    }

    /// BIP143 preimage for input `index` spending `value` sat under `script_code`.
    pub fn segwit_v0_preimage(&self, index: usize, script_code: &[u8], value: u64, sighash_type: u32) -> Result<Vec<u8>> {
        if sighash_type != SIGHASH_ALL {
            return Err(WalletError::Signing(format!("unsupported sighash type {:#x}", sighash_type)));
        }
        let input = self
            .tx
            .inputs
            .get(index)
            .ok_or_else(|| WalletError::Signing(format!("input {} out of range", index)))?;

        let mut preimage = Vec::with_capacity(156 + script_code.len());
        preimage.extend_from_slice(&self.tx.version.to_le_bytes());
        preimage.extend_from_slice(&self.hash_prevouts);
        preimage.extend_from_slice(&self.hash_sequence);
        preimage.extend_from_slice(&input.previous_output.txid);
        preimage.extend_from_slice(&input.previous_output.vout.to_le_bytes());
        write_bytes(&mut preimage, script_code);
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&self.hash_outputs);
        preimage.extend_from_slice(&self.tx.lock_time.to_le_bytes());
        preimage.extend_from_slice(&sighash_type.to_le_bytes());
        Ok(preimage)
    }

    pub fn segwit_v0(&self, index: usize, script_code: &[u8], value: u64, sighash_type: u32) -> Result<[u8; 32]> {
        Ok(double_sha256(&self.segwit_v0_preimage(index, script_code, value, sighash_type)?))
    }
}

/// Pre-segwit digest: blank every scriptSig, put `script_pubkey` in the
/// signed input, serialize without witnesses and append the sighash type.
pub fn legacy(tx: &Transaction, index: usize, script_pubkey: &[u8], sighash_type: u32) -> Result<[u8; 32]> {
    if sighash_type != SIGHASH_ALL {
        return Err(WalletError::Signing(format!("unsupported sighash type {:#x}", sighash_type)));
    }
    if index >= tx.inputs.len() {
        return Err(WalletError::Signing(format!("input {} out of range", index)));
    }
    let mut copy = tx.clone();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        input.witness.clear();
        input.script_sig = if i == index { script_pubkey.to_vec() } else { Vec::new() };
    }
    let mut data = copy.serialize_without_witness();
    data.extend_from_slice(&sighash_type.to_le_bytes());
    Ok(double_sha256(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::encode::{TxIn, TxOut};

    // BIP143 native P2WPKH example: second input of the unsigned transaction
    const BIP143_UNSIGNED: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";
    const BIP143_SIGHASH: &str = "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670";

    #[test]
    fn test_bip143_p2wpkh_vector() {
        let tx = Transaction::from_hex(BIP143_UNSIGNED).unwrap();
        let cache = SighashCache::new(&tx);
        let script_code = hex::decode("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac").unwrap();
        let digest = cache.segwit_v0(1, &script_code, 600_000_000, SIGHASH_ALL).unwrap();
        assert_eq!(hex::encode(digest), BIP143_SIGHASH);
    }

    #[test]
    fn test_matches_bitcoin_sighash_cache() {
        use bitcoin::hashes::Hash;
        use bitcoin::sighash::{EcdsaSighashType, SighashCache as Oracle};
        use bitcoin::{Amount, ScriptBuf};

        let tx = Transaction::from_hex(BIP143_UNSIGNED).unwrap();
        let oracle_tx: bitcoin::Transaction =
            bitcoin::consensus::deserialize(&hex::decode(BIP143_UNSIGNED).unwrap()).unwrap();
        let pkh = [0x1du8, 0x0f, 0x17, 0x2a, 0x0e, 0xcb, 0x48, 0xae, 0xe1, 0xbe, 0x1f, 0x26, 0x87, 0xd2, 0x96, 0x3a, 0xe3, 0x3f, 0x71, 0xa1];
        let ours = SighashCache::new(&tx).segwit_v0(0, &p2wpkh_script_code(&pkh), 1_000, SIGHASH_ALL).unwrap();
        let wpkh = ScriptBuf::from_bytes([vec![0x00, 0x14], pkh.to_vec()].concat());
        let theirs = Oracle::new(&oracle_tx)
            .p2wpkh_signature_hash(0, &wpkh, Amount::from_sat(1_000), EcdsaSighashType::All)
            .unwrap();
        assert_eq!(ours, theirs.to_byte_array());

        let spk = p2pkh_script(&pkh);
        let legacy_ours = legacy(&tx, 1, &spk, SIGHASH_ALL).unwrap();
        let legacy_theirs = Oracle::new(&oracle_tx)
            .legacy_signature_hash(1, &ScriptBuf::from_bytes(spk), SIGHASH_ALL)
            .unwrap();
        assert_eq!(legacy_ours, legacy_theirs.to_byte_array());
    }

    #[test]
    fn test_rejects_out_of_range_and_other_types() {
        let tx = Transaction::new(
            vec![TxIn::unsigned(crate::tx::encode::OutPoint { txid: [1; 32], vout: 0 })],
            vec![TxOut { value: 1, script_pubkey: vec![0x51] }],
        );
        let cache = SighashCache::new(&tx);
        assert!(cache.segwit_v0(1, &[], 0, SIGHASH_ALL).is_err());
        assert!(cache.segwit_v0(0, &[], 0, 0x81).is_err());
        assert!(legacy(&tx, 3, &[], SIGHASH_ALL).is_err());
    }
}
