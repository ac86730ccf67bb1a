//! Account-level keys: `m/purpose'/coin'/0'` and watch-only derivation below it.

use super::bip32::HdNode;
use super::mnemonic::Mnemonic;
use super::path::DerivationPath;
use crate::address::AddressType;
use crate::config::Network;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};

/// Account keys handed to the wallet record. The xprv is only present for
/// seed-backed wallets and is never written to disk by the engine.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountKeys {
    pub account_xpub: String,
    #[serde(skip_serializing)]
    pub account_xprv: Option<String>,
    pub master_fingerprint: String,
    pub account_path: DerivationPath,
}

impl std::fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKeys")
            .field("account_xpub", &self.account_xpub)
            .field("has_xprv", &self.account_xprv.is_some())
            .field("master_fingerprint", &self.master_fingerprint)
            .field("account_path", &self.account_path.to_string())
            .finish()
    }
}

pub fn account_path(address_type: AddressType, network: Network) -> DerivationPath {
    DerivationPath::account(address_type.purpose(), network.coin_type(), 0)
}

/// Derive the account node for `address_type` and export it in its SLIP132 form.
pub fn derive_account_keys(mnemonic: &Mnemonic, address_type: AddressType, network: Network) -> Result<AccountKeys> {
    let seed = mnemonic.to_seed("")?;
    let master = HdNode::master(seed.as_bytes())?;
    let path = account_path(address_type, network);
    let account = master.derive_path(&path)?;

    let public_prefix = address_type.account_prefix(network);
    let private_prefix = public_prefix
        .private_counterpart()
        .ok_or_else(|| WalletError::Derivation(format!("{} has no private form", public_prefix.as_str())))?;
    Ok(AccountKeys {
        account_xpub: account.to_extended(public_prefix)?,
        account_xprv: Some(account.to_extended(private_prefix)?),
        master_fingerprint: hex::encode(master.fingerprint()),
        account_path: path,
    })
}

/// Public-only node at `<account>/change/index`. Accepts any BIP32/SLIP132
/// public prefix; private or malformed keys fail with `InvalidAccountKey`.
pub fn derive_from_account_public_key(account_xpub: &str, change: bool, index: u32) -> Result<HdNode> {
    let (node, prefix) = HdNode::from_extended(account_xpub)?;
    if prefix.is_private() {
        return Err(WalletError::InvalidAccountKey(format!("expected a public key, got {}", prefix.as_str())));
    }
    let as_account_key = |e: WalletError| match e {
        WalletError::Derivation(msg) => WalletError::InvalidAccountKey(msg),
        other => other,
    };
    node.derive_child(change as u32)
        .and_then(|branch| branch.derive_child(index))
        .map_err(as_account_key)
}

/// Parse a 4-byte master fingerprint given as 8 hex chars.
pub fn parse_fingerprint(value: &str) -> Result<[u8; 4]> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| WalletError::validation(format!("fingerprint '{}': {}", value, e)))?;
    <[u8; 4]>::try_from(bytes.as_slice())
        .map_err(|_| WalletError::validation(format!("fingerprint must be 4 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::KeyPrefix;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn mnemonic() -> Mnemonic {
        Mnemonic::parse(TEST_MNEMONIC).unwrap()
    }

    #[test]
    fn test_bip84_account_keys() {
        let keys = derive_account_keys(&mnemonic(), AddressType::Bech32, Network::Bitcoin).unwrap();
        assert_eq!(keys.master_fingerprint, "73c5da0a");
        assert_eq!(keys.account_path.to_string(), "m/84'/0'/0'");
        assert_eq!(
            keys.account_xpub,
            "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs"
        );
        assert!(keys.account_xprv.as_deref().unwrap().starts_with("zprv"));
    }

    #[test]
    fn test_testnet_uses_coin_type_one() {
        let keys = derive_account_keys(&mnemonic(), AddressType::Segwit, Network::Testnet).unwrap();
        assert_eq!(keys.account_path.to_string(), "m/49'/1'/0'");
        assert!(keys.account_xpub.starts_with("upub"));
    }

    #[test]
    fn test_watch_only_matches_seed_derivation() {
        let keys = derive_account_keys(&mnemonic(), AddressType::Bech32, Network::Bitcoin).unwrap();
        let node = derive_from_account_public_key(&keys.account_xpub, false, 0).unwrap();
        assert!(node.is_public_only());
        assert_eq!(
            hex::encode(node.public_key_bytes()),
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );
        let address = AddressType::Bech32.payment().address(&node.public_key_bytes(), Network::Bitcoin).unwrap();
        assert_eq!(address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    }

    #[test]
    fn test_xpub_form_is_interchangeable() {
        let keys = derive_account_keys(&mnemonic(), AddressType::Bech32, Network::Bitcoin).unwrap();
        let xpub = crate::encoding::convert_extended_key(&keys.account_xpub, KeyPrefix::Xpub).unwrap();
        let a = derive_from_account_public_key(&keys.account_xpub, true, 3).unwrap();
        let b = derive_from_account_public_key(&xpub, true, 3).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_malformed_keys_fail_cleanly() {
        for bad in ["", "zpub", "not-base58-0OIl", "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet9"] {
            assert!(matches!(
                derive_from_account_public_key(bad, false, 0),
                Err(WalletError::InvalidAccountKey(_))
            ));
        }
        let keys = derive_account_keys(&mnemonic(), AddressType::Bech32, Network::Bitcoin).unwrap();
        let xprv = keys.account_xprv.unwrap();
        assert!(matches!(
            derive_from_account_public_key(&xprv, false, 0),
            Err(WalletError::InvalidAccountKey(_))
        ));
    }

    #[test]
    fn test_parse_fingerprint() {
        assert_eq!(parse_fingerprint("73c5da0a").unwrap(), [0x73, 0xc5, 0xda, 0x0a]);
        assert!(parse_fingerprint("73c5da").is_err());
        assert!(parse_fingerprint("zz").is_err());
    }
}
