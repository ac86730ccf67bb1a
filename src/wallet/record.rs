//! The persisted wallet record shared with the UI collaborator.

use super::store::{KeyValueStore, WALLET_DATA_KEY};
use crate::address::{AddressRecord, AddressType};
use crate::config::Network;
use crate::error::{Result, WalletError};
use crate::keys::account::{account_path, parse_fingerprint};
use crate::keys::path::is_hardened;
use crate::keys::{derive_account_keys, derive_from_account_public_key, DerivationPath, HdNode, Mnemonic};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletMode {
    Full,
    WatchOnly,
}

/// `receiving_index` / `change_index` point at the address currently handed
/// out on each branch; the lists hold every address from 0 up to it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub mode: WalletMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_phrase: Option<String>,
    pub account_xpub: String,
    pub master_fingerprint: String,
    pub account_path: DerivationPath,
    pub address_type: AddressType,
    #[serde(default)]
    pub network: Network,
    pub receiving_index: u32,
    pub change_index: u32,
    pub receiving_addresses: Vec<AddressRecord>,
    pub change_addresses: Vec<AddressRecord>,
    #[serde(default)]
    pub discovery_complete: bool,
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("mode", &self.mode)
            .field("account_xpub", &self.account_xpub)
            .field("master_fingerprint", &self.master_fingerprint)
            .field("account_path", &self.account_path.to_string())
            .field("address_type", &self.address_type)
            .field("network", &self.network)
            .field("receiving_index", &self.receiving_index)
            .field("change_index", &self.change_index)
            .finish_non_exhaustive()
    }
}

impl Drop for WalletRecord {
    fn drop(&mut self) {
        if let Some(phrase) = self.seed_phrase.as_mut() {
            phrase.zeroize();
        }
    }
}

impl WalletRecord {
    pub fn full(mnemonic: &Mnemonic, address_type: AddressType, network: Network) -> Result<Self> {
        let keys = derive_account_keys(mnemonic, address_type, network)?;
        let mut record = Self::empty(
            WalletMode::Full,
            keys.account_xpub.clone(),
            keys.master_fingerprint.clone(),
            keys.account_path.clone(),
            address_type,
            network,
        );
        record.seed_phrase = Some(mnemonic.phrase().to_string());
        record.seed_first_addresses()?;
        Ok(record)
    }

    /// Watch-only record. `address_type` defaults to what the key's SLIP132
    /// prefix implies.
    pub fn watch_only(
        account_xpub: &str,
        master_fingerprint: &str,
        address_type: Option<AddressType>,
        network: Network,
    ) -> Result<Self> {
        let (node, prefix) = HdNode::from_extended(account_xpub.trim())?;
        if prefix.is_private() || node.private_key().is_some() {
            return Err(WalletError::InvalidAccountKey("watch-only wallets take a public key".into()));
        }
        if prefix.is_mainnet() != network.is_mainnet() {
            return Err(WalletError::InvalidAccountKey(format!("{} key on {}", prefix.as_str(), network.as_str())));
        }
        let address_type = match address_type.or_else(|| AddressType::from_prefix(prefix)) {
            Some(t) => t,
            None => return Err(WalletError::validation(format!("cannot infer address type from {}", prefix.as_str()))),
        };
        let fingerprint = hex::encode(parse_fingerprint(master_fingerprint)?);
        let mut record = Self::empty(
            WalletMode::WatchOnly,
            account_xpub.trim().to_string(),
            fingerprint,
            account_path(address_type, network),
            address_type,
            network,
        );
        record.seed_first_addresses()?;
        Ok(record)
    }

    fn empty(
        mode: WalletMode,
        account_xpub: String,
        master_fingerprint: String,
        account_path: DerivationPath,
        address_type: AddressType,
        network: Network,
    ) -> Self {
        Self {
            mode,
            seed_phrase: None,
            account_xpub,
            master_fingerprint,
            account_path,
            address_type,
            network,
            receiving_index: 0,
            change_index: 0,
            receiving_addresses: Vec::new(),
            change_addresses: Vec::new(),
            discovery_complete: false,
        }
    }

    fn seed_first_addresses(&mut self) -> Result<()> {
        self.ensure_address(false, 0)?;
        self.ensure_address(true, 0)?;
        Ok(())
    }

    pub fn is_watch_only(&self) -> bool {
        self.mode == WalletMode::WatchOnly
    }

    pub fn mnemonic(&self) -> Result<Mnemonic> {
        match &self.seed_phrase {
            Some(phrase) => Mnemonic::parse(phrase),
            None => Err(WalletError::Signing("watch-only wallet has no seed".into())),
        }
    }

    pub fn derive_address(&self, change: bool, index: u32) -> Result<AddressRecord> {
        let node = derive_from_account_public_key(&self.account_xpub, change, index)?;
        AddressRecord::from_node(&node, self.address_type, self.network, &self.account_path, change, index)
    }

    fn branch_mut(&mut self, change: bool) -> &mut Vec<AddressRecord> {
        if change {
            &mut self.change_addresses
        } else {
            &mut self.receiving_addresses
        }
    }

    /// Derive and append records until `index` exists on the branch.
    pub fn ensure_address(&mut self, change: bool, index: u32) -> Result<&AddressRecord> {
        if is_hardened(index) {
            return Err(WalletError::validation(format!("address index {} is out of the non-hardened range", index)));
        }
        let have = if change { self.change_addresses.len() } else { self.receiving_addresses.len() };
        for next in have as u32..=index {
            let record = self.derive_address(change, next)?;
            self.branch_mut(change).push(record);
        }
        let branch = if change { &self.change_addresses } else { &self.receiving_addresses };
        branch
            .get(index as usize)
            .ok_or_else(|| WalletError::Derivation(format!("address {} missing after derivation", index)))
    }

    pub fn current(&self, change: bool) -> Option<&AddressRecord> {
        let (branch, index) = if change {
            (&self.change_addresses, self.change_index)
        } else {
            (&self.receiving_addresses, self.receiving_index)
        };
        branch.get(index as usize)
    }

    /// Move the branch to its next index and return that address.
    pub fn advance(&mut self, change: bool) -> Result<&AddressRecord> {
        let current = if change { self.change_index } else { self.receiving_index };
        let index = current
            .checked_add(1)
            .filter(|&i| !is_hardened(i))
            .ok_or_else(|| WalletError::validation(format!("address index {} is the last non-hardened index", current)))?;
        self.ensure_address(change, index)?;
        if change {
            self.change_index = index;
        } else {
            self.receiving_index = index;
        }
        self.ensure_address(change, index)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &AddressRecord> {
        self.receiving_addresses.iter().chain(self.change_addresses.iter())
    }

    pub fn address_strings(&self) -> Vec<String> {
        self.addresses().map(|r| r.address.clone()).collect()
    }

    pub fn find(&self, address: &str) -> Option<&AddressRecord> {
        self.addresses().find(|r| r.address == address)
    }

    /// Flip `used` for every listed address. Returns how many flipped.
    pub fn mark_used(&mut self, used: &HashSet<String>) -> usize {
        self.receiving_addresses
            .iter_mut()
            .chain(self.change_addresses.iter_mut())
            .filter(|r| used.contains(&r.address))
            .map(|r| r.mark_used())
            .filter(|flipped| *flipped)
            .count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(WALLET_DATA_KEY, &self.to_json()?)
    }

    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        store.get(WALLET_DATA_KEY)?.map(|raw| Self::from_json(&raw)).transpose()
    }
}
