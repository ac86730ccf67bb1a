//! Plan → unsigned transaction → signed, verified transaction.

use super::encode::{OutPoint, Transaction, TxIn, TxOut};
use super::select::TransactionPlan;
use super::sighash::{SighashCache, SIGHASH_ALL};
use super::sign::{input_digest, sign_digest, verify_signed};
use crate::address::{address_to_script, AddressType};
use crate::config::Network;
use crate::error::{Result, WalletError};
use crate::keys::{secp, HdNode};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Private key for one wallet address, tagged with the script type it pays to.
#[derive(Clone)]
pub struct SigningKey {
    secret: SecretKey,
    pub address_type: AddressType,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("address_type", &self.address_type).finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn new(secret: SecretKey, address_type: AddressType) -> Self {
        Self { secret, address_type }
    }

    pub fn from_node(node: &HdNode, address_type: AddressType) -> Result<Self> {
        let secret = node
            .private_key()
            .ok_or_else(|| WalletError::Signing("node carries no private key".into()))?;
        Ok(Self::new(*secret, address_type))
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> [u8; 33] {
        PublicKey::from_secret_key(secp(), &self.secret).serialize()
    }

    pub fn address(&self, network: Network) -> Result<String> {
        self.address_type.payment().address(&self.public_key(), network)
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        self.address_type.payment().script_pubkey(&self.public_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub raw_hex: String,
    pub txid: String,
    pub virtual_size: usize,
    pub weight: usize,
    pub fee_sat: u64,
}

impl SignedTransaction {
    pub fn from_transaction(tx: &Transaction, fee_sat: u64) -> Self {
        Self {
            raw_hex: tx.to_hex(),
            txid: tx.txid(),
            virtual_size: tx.vsize(),
            weight: tx.weight(),
            fee_sat,
        }
    }
}

/// Inputs in plan order, all with final sequence and empty scripts.
pub fn unsigned_transaction(plan: &TransactionPlan) -> Result<Transaction> {
    if plan.selected_utxos.is_empty() {
        return Err(WalletError::validation("plan selects no inputs"));
    }
    if !plan.is_balanced() {
        return Err(WalletError::validation("plan does not balance"));
    }
    let inputs = plan
        .selected_utxos
        .iter()
        .map(|utxo| Ok(TxIn::unsigned(OutPoint::new(&utxo.txid, utxo.vout)?)))
        .collect::<Result<Vec<_>>>()?;
    let outputs = plan
        .outputs
        .iter()
        .map(|o| TxOut { value: o.value_sat, script_pubkey: o.script.clone() })
        .collect();
    Ok(Transaction::new(inputs, outputs))
}

/// Sign every input of `plan` with the key registered for its source address,
/// then re-verify the whole transaction before handing it back.
pub fn sign_plan(
    plan: &TransactionPlan,
    keys: &HashMap<String, SigningKey>,
    network: Network,
) -> Result<SignedTransaction> {
    let unsigned = unsigned_transaction(plan)?;

    let mut prevouts = Vec::with_capacity(plan.selected_utxos.len());
    let mut signers = Vec::with_capacity(plan.selected_utxos.len());
    for utxo in &plan.selected_utxos {
        let key = keys
            .get(&utxo.source_address)
            .ok_or_else(|| WalletError::Signing(format!("no key for {}", utxo.source_address)))?;
        let script_pubkey = key.script_pubkey();
        if address_to_script(&utxo.source_address, network)? != script_pubkey {
            return Err(WalletError::Signing(format!("key does not match {}", utxo.source_address)));
        }
        prevouts.push(TxOut { value: utxo.value_satoshis, script_pubkey });
        signers.push(key);
    }

    let cache = SighashCache::new(&unsigned);
    let mut signed = unsigned.clone();
    for (index, (key, prevout)) in signers.iter().zip(&prevouts).enumerate() {
        let payment = key.address_type.payment();
        let pubkey = key.public_key();
        let redeem = payment.redeem_script(&pubkey);
        let digest = input_digest(&cache, &unsigned, index, prevout, redeem.as_deref())?;
        let signature = sign_digest(&digest, &key.secret, SIGHASH_ALL);
        let (script_sig, witness) = payment.unlock(&signature, &pubkey);
        signed.inputs[index].script_sig = script_sig;
        signed.inputs[index].witness = witness;
    }

    verify_signed(&signed, &prevouts)?;
    let result = SignedTransaction::from_transaction(&signed, plan.effective_fee_sat());
    info!(txid = %result.txid, vsize = result.virtual_size, fee = result.fee_sat, "transaction signed");
    Ok(result)
}
