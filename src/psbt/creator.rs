//! Watch-only PSBT creation: account xpub and master fingerprint, no secrets.

use super::{Bip32Derivation, Psbt};
use crate::address::{address_to_script, AddressRecord, AddressType};
use crate::config::Network;
use crate::error::{Result, WalletError};
use crate::keys::account::{account_path, parse_fingerprint};
use crate::keys::{derive_from_account_public_key, AccountKeys, DerivationPath, Fingerprint};
use crate::tx::{unsigned_transaction, TransactionPlan, SIGHASH_ALL};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOnlyAccount {
    pub account_xpub: String,
    pub master_fingerprint: Fingerprint,
    pub account_path: DerivationPath,
    pub address_type: AddressType,
    pub network: Network,
}

impl WatchOnlyAccount {
    pub fn new(
        account_xpub: impl Into<String>,
        master_fingerprint: Fingerprint,
        address_type: AddressType,
        network: Network,
    ) -> Result<Self> {
        if address_type == AddressType::Legacy {
            return Err(WalletError::validation(
                "legacy accounts need full previous transactions and are not supported for PSBTs",
            ));
        }
        let account_xpub = account_xpub.into();
        derive_from_account_public_key(&account_xpub, false, 0)?;
        Ok(Self {
            account_xpub,
            master_fingerprint,
            account_path: account_path(address_type, network),
            address_type,
            network,
        })
    }

    pub fn from_keys(keys: &AccountKeys, address_type: AddressType, network: Network) -> Result<Self> {
        let mut account = Self::new(&keys.account_xpub, parse_fingerprint(&keys.master_fingerprint)?, address_type, network)?;
        account.account_path = keys.account_path.clone();
        Ok(account)
    }

    /// Derivation record and output script for `<account>/change/index`.
    pub fn derive(&self, change: bool, index: u32) -> Result<(Bip32Derivation, Vec<u8>)> {
        let node = derive_from_account_public_key(&self.account_xpub, change, index)?;
        let pubkey = node.public_key_bytes();
        let derivation = Bip32Derivation {
            pubkey,
            fingerprint: self.master_fingerprint,
            path: self.account_path.extend(&[change as u32, index]),
        };
        Ok((derivation, self.address_type.payment().script_pubkey(&pubkey)))
    }

    fn derive_for(&self, record: &AddressRecord) -> Result<(Bip32Derivation, Vec<u8>)> {
        let (derivation, script) = self.derive(record.change, record.index)?;
        if address_to_script(&record.address, self.network)? != script {
            return Err(WalletError::validation(format!(
                "{} is not derived from this account at {}",
                record.address, derivation.path
            )));
        }
        Ok((derivation, script))
    }
}

/// Unsigned PSBT for `plan`. Every selected UTXO must come from one of
/// `addresses`; the change output, if any, gets its derivation attached.
pub fn create_psbt(account: &WatchOnlyAccount, plan: &TransactionPlan, addresses: &[AddressRecord]) -> Result<Psbt> {
    let mut psbt = Psbt::from_unsigned_tx(unsigned_transaction(plan)?)?;
    let payment = account.address_type.payment();

    for (input, utxo) in psbt.inputs.iter_mut().zip(&plan.selected_utxos) {
        let record = addresses
            .iter()
            .find(|r| r.address == utxo.source_address)
            .ok_or_else(|| WalletError::validation(format!("{} is not a wallet address", utxo.source_address)))?;
        let (derivation, script_pubkey) = account.derive_for(record)?;
        input.witness_utxo = Some(crate::tx::TxOut { value: utxo.value_satoshis, script_pubkey });
        input.redeem_script = payment.redeem_script(&derivation.pubkey);
        input.sighash_type = Some(SIGHASH_ALL);
        input.bip32_derivation.push(derivation);
    }

    for (output, planned) in psbt.outputs.iter_mut().zip(&plan.outputs) {
        if !planned.is_change {
            continue;
        }
        let record = addresses
            .iter()
            .filter(|r| r.change)
            .find(|r| address_to_script(&r.address, account.network).map(|s| s == planned.script).unwrap_or(false))
            .ok_or_else(|| WalletError::validation("change output does not pay a wallet change address"))?;
        let (derivation, _) = account.derive_for(record)?;
        output.bip32_derivation.push(derivation);
    }

    info!(
        txid = %psbt.txid(),
        inputs = psbt.inputs.len(),
        outputs = psbt.outputs.len(),
        fee = plan.effective_fee_sat(),
        "psbt created"
    );
    Ok(psbt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Utxo;
    use crate::keys::{derive_account_keys, Mnemonic};
    use crate::psbt::{PsbtDetails, PsbtState};
    use crate::tx::select_coins;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn account() -> WatchOnlyAccount {
        let keys = derive_account_keys(&Mnemonic::parse(ABANDON).unwrap(), AddressType::Bech32, Network::Bitcoin).unwrap();
        WatchOnlyAccount::from_keys(&keys, AddressType::Bech32, Network::Bitcoin).unwrap()
    }

    fn record(account: &WatchOnlyAccount, change: bool, index: u32) -> AddressRecord {
        let node = derive_from_account_public_key(&account.account_xpub, change, index).unwrap();
        AddressRecord::from_node(&node, account.address_type, account.network, &account.account_path, change, index).unwrap()
    }

    #[test]
    fn test_creates_watch_only_psbt() {
        let account = account();
        let receive = record(&account, false, 0);
        let change = record(&account, true, 0);
        assert_eq!(receive.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");

        let utxos = vec![Utxo {
            txid: "aa".repeat(32),
            vout: 1,
            value_satoshis: 80_000,
            confirmed: true,
            source_address: receive.address.clone(),
        }];
        let recipient = address_to_script("bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g", Network::Bitcoin).unwrap();
        let change_script = address_to_script(&change.address, Network::Bitcoin).unwrap();
        let plan = select_coins(&utxos, 30_000, 3.0, &recipient, &change_script).unwrap();

        let psbt = create_psbt(&account, &plan, &[receive.clone(), change.clone()]).unwrap();
        assert_eq!(psbt.state(), PsbtState::Unsigned);
        assert_eq!(psbt.inputs[0].bip32_derivation[0].path.to_string(), "m/84'/0'/0'/0/0");
        assert_eq!(psbt.inputs[0].bip32_derivation[0].fingerprint, [0x73, 0xc5, 0xda, 0x0a]);
        assert!(psbt.inputs[0].redeem_script.is_none());
        assert_eq!(psbt.fee(), Some(plan.effective_fee_sat()));

        let details = PsbtDetails::from_psbt(&psbt, Network::Bitcoin);
        assert_eq!(details.outputs[0].value_sat, 30_000);
        assert!(!details.outputs[0].is_change);
        assert!(details.outputs[1].is_change);
        assert_eq!(details.outputs[1].derivation_path.as_ref().unwrap().to_string(), "m/84'/0'/0'/1/0");
        assert_eq!(details.inputs[0].address.as_deref(), Some(receive.address.as_str()));
    }

    #[test]
    fn test_rejects_foreign_inputs_and_legacy() {
        let account = account();
        let utxos = vec![Utxo {
            txid: "bb".repeat(32),
            vout: 0,
            value_satoshis: 50_000,
            confirmed: false,
            source_address: "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g".into(),
        }];
        let plan = select_coins(&utxos, 10_000, 1.0, &[0x51], &[0x52]).unwrap();
        assert!(matches!(create_psbt(&account, &plan, &[record(&account, false, 0)]), Err(WalletError::Validation(_))));

        let legacy = WatchOnlyAccount::new(account.account_xpub.clone(), [0; 4], AddressType::Legacy, Network::Bitcoin);
        assert!(matches!(legacy, Err(WalletError::Validation(_))));
        assert!(WatchOnlyAccount::new("zpubnotakey", [0; 4], AddressType::Bech32, Network::Bitcoin).is_err());
    }
}
