use super::AddressType;
use crate::config::Network;
use crate::error::Result;
use crate::keys::{DerivationPath, HdNode};
use serde::{Deserialize, Serialize};

/// A derived address tracked in the wallet record's receiving/change lists.
/// Only `used` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub address: String,
    pub path: DerivationPath,
    pub account_path: DerivationPath,
    pub index: u32,
    pub change: bool,
    #[serde(rename = "type")]
    pub address_type: AddressType,
    #[serde(default)]
    pub used: bool,
}

impl AddressRecord {
    /// Record for `node`, which must sit at `<account_path>/change/index`.
    pub fn from_node(
        node: &HdNode,
        address_type: AddressType,
        network: Network,
        account_path: &DerivationPath,
        change: bool,
        index: u32,
    ) -> Result<Self> {
        let address = address_type.payment().address(&node.public_key_bytes(), network)?;
        Ok(Self {
            address,
            path: account_path.extend(&[change as u32, index]),
            account_path: account_path.clone(),
            index,
            change,
            address_type,
            used: false,
        })
    }

    /// `[change, index]` relative to the account node.
    pub fn relative_path(&self) -> [u32; 2] {
        [self.change as u32, self.index]
    }

    pub fn mark_used(&mut self) -> bool {
        let flipped = !self.used;
        self.used = true;
        flipped
    }
}
