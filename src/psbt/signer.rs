//! Seed-side PSBT signing: re-derive each input's key from its BIP32 path.

use super::{spend_type, Psbt};
use crate::error::{Result, WalletError};
use crate::keys::{HdNode, Mnemonic};
use crate::tx::sign::{input_digest, sign_digest, verify_signature};
use crate::tx::{SighashCache, SIGHASH_ALL};
use tracing::{debug, info};

/// Sign with the seed behind `mnemonic` (empty BIP39 passphrase).
pub fn sign_psbt(psbt: &mut Psbt, mnemonic: &Mnemonic) -> Result<usize> {
    let seed = mnemonic.to_seed("")?;
    let master = HdNode::master(seed.as_bytes())?;
    sign_with_master(psbt, &master)
}

/// Add a partial signature to every input whose derivation names `master`'s
/// fingerprint. Each signature is verified before it is stored. Returns the
/// number of inputs signed.
pub fn sign_with_master(psbt: &mut Psbt, master: &HdNode) -> Result<usize> {
    let fingerprint = master.fingerprint();
    let cache = SighashCache::new(&psbt.unsigned_tx);
    let mut signatures = Vec::new();

    for (index, input) in psbt.inputs.iter().enumerate() {
        if input.is_finalized() {
            continue;
        }
        if let Some(sighash_type) = input.sighash_type {
            if sighash_type != SIGHASH_ALL {
                return Err(WalletError::Signing(format!("input {} requests sighash type {:#x}", index, sighash_type)));
            }
        }
        for derivation in input.bip32_derivation.iter().filter(|d| d.fingerprint == fingerprint) {
            let node = master.derive_path(&derivation.path)?;
            if node.public_key_bytes() != derivation.pubkey {
                return Err(WalletError::Signing(format!(
                    "input {}: {} does not derive the listed public key",
                    index, derivation.path
                )));
            }
            let prevout = psbt.spent_output(index)?;
            if spend_type(prevout, input.redeem_script.as_deref(), &derivation.pubkey).is_none() {
                return Err(WalletError::Signing(format!("input {} does not pay to {}", index, derivation.path)));
            }
            let secret = node
                .private_key()
                .ok_or_else(|| WalletError::Signing(format!("no private key at {}", derivation.path)))?;
            let digest = input_digest(&cache, &psbt.unsigned_tx, index, prevout, input.redeem_script.as_deref())?;
            let signature = sign_digest(&digest, secret, SIGHASH_ALL);
            verify_signature(&digest, &signature, &derivation.pubkey)?;
            debug!(input = index, path = %derivation.path, "input signed");
            signatures.push((index, derivation.pubkey, signature));
        }
    }

    if signatures.is_empty() && psbt.inputs.iter().any(|i| !i.is_finalized()) {
        return Err(WalletError::Signing(format!(
            "no input is derived from master key {}",
            hex::encode(fingerprint)
        )));
    }

    let mut signed = 0;
    for (index, pubkey, signature) in signatures {
        let input = &mut psbt.inputs[index];
        if input.partial_sigs.insert(pubkey, signature).is_none() {
            signed += 1;
        }
        input.sighash_type = Some(SIGHASH_ALL);
    }
    info!(txid = %psbt.txid(), signed, state = ?psbt.state(), "psbt signed");
    Ok(signed)
}
