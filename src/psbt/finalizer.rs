//! Finalization, extraction and broadcast.

use super::{spend_type, Psbt, PsbtState};
use crate::chain::BlockchainClient;
use crate::error::{Result, WalletError};
use crate::tx::{verify_signed, SignedTransaction, Transaction};
use tracing::info;

/// Turn partial signatures into final scriptSig/witness fields.
///
/// Either every unfinalized input gets finalized or none does; a missing
/// signature fails with `NotFullySigned` and leaves the PSBT untouched.
pub fn finalize_psbt(psbt: &mut Psbt) -> Result<()> {
    let mut finals = Vec::with_capacity(psbt.inputs.len());
    let mut missing = 0;
    for (index, input) in psbt.inputs.iter().enumerate() {
        if input.is_finalized() {
            continue;
        }
        let prevout = psbt.spent_output(index)?;
        let redeem = input.redeem_script.as_deref();
        let unlocked = input.partial_sigs.iter().find_map(|(pubkey, signature)| {
            spend_type(prevout, redeem, pubkey).map(|t| t.payment().unlock(signature, pubkey))
        });
        match unlocked {
            Some(unlock) => finals.push((index, unlock)),
            None => missing += 1,
        }
    }
    if missing > 0 {
        return Err(WalletError::NotFullySigned { missing });
    }

    for (index, (script_sig, witness)) in finals {
        let input = &mut psbt.inputs[index];
        input.final_script_sig = (!script_sig.is_empty()).then_some(script_sig);
        input.final_script_witness = Some(witness);
        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.bip32_derivation.clear();
    }
    info!(txid = %psbt.txid(), "psbt finalized");
    Ok(())
}

/// Fully signed network transaction from a finalized PSBT, re-verified
/// against the outputs it spends.
pub fn extract_transaction(psbt: &Psbt) -> Result<Transaction> {
    if psbt.state() != PsbtState::Finalized {
        let missing = psbt.inputs.iter().filter(|i| !i.is_finalized()).count();
        return Err(WalletError::NotFullySigned { missing: missing.max(1) });
    }
    let mut tx = psbt.unsigned_tx.clone();
    let mut prevouts = Vec::with_capacity(tx.inputs.len());
    for (index, (txin, input)) in tx.inputs.iter_mut().zip(&psbt.inputs).enumerate() {
        txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
        txin.witness = input.final_script_witness.clone().unwrap_or_default();
        prevouts.push(psbt.spent_output(index)?.clone());
    }
    verify_signed(&tx, &prevouts)?;
    Ok(tx)
}

pub fn finalize_and_extract(psbt: &mut Psbt) -> Result<SignedTransaction> {
    if psbt.state() != PsbtState::Finalized {
        finalize_psbt(psbt)?;
    }
    let tx = extract_transaction(psbt)?;
    let fee = psbt
        .fee()
        .ok_or_else(|| WalletError::InvalidPsbt("input values unknown, cannot compute fee".into()))?;
    Ok(SignedTransaction::from_transaction(&tx, fee))
}

/// Finalize, extract and submit. Returns the transaction as broadcast.
pub async fn broadcast_psbt(client: &BlockchainClient, psbt: &mut Psbt) -> Result<SignedTransaction> {
    let signed = finalize_and_extract(psbt)?;
    let txid = client.broadcast(&signed.raw_hex).await?;
    if txid != signed.txid {
        return Err(WalletError::network(
            format!("explorer accepted {} but we computed {}", txid, signed.txid),
            None,
        ));
    }
    info!(txid = %txid, "psbt broadcast");
    Ok(signed)
}
