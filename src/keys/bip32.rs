//! BIP32 - Hierarchical Deterministic key derivation
//!
//! Child derivation comes from `bitcoin::bip32`; this module adds the seed
//! length check, public-only nodes and SLIP132 version bytes on the 78-byte
//! serialization. Public-only nodes (from an account xpub) can derive normal
//! children but never hardened ones.
//!
//! Reference: https://github.com/bitcoin/bips/blob/master/bip-0032.mediawiki

use super::path::{is_hardened, DerivationPath};
use super::secp;
use crate::encoding::{base58, slip132, KeyPrefix};
use crate::error::{Result, WalletError};
use bitcoin::bip32::{self, ChildNumber, Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::NetworkKind;

pub type Fingerprint = [u8; 4];

// Version bytes `bitcoin::bip32` decodes; SLIP132 prefixes are swapped in and out around them.
const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];
const XPRV_VERSION: [u8; 4] = [0x04, 0x88, 0xad, 0xe4];

/// Key material at one position of the tree. Never persisted by the engine.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HdNode {
    xpriv: Option<Xpriv>,
    xpub: Xpub,
}

fn derivation_error(e: bip32::Error) -> WalletError {
    WalletError::Derivation(e.to_string())
}

impl HdNode {
    fn from_xpriv(xpriv: Xpriv) -> Self {
        Self { xpub: Xpub::from_priv(secp(), &xpriv), xpriv: Some(xpriv) }
    }

    /// Master node from a BIP39 seed (16..64 bytes).
    pub fn master(seed: &[u8]) -> Result<Self> {
        if !(16..=64).contains(&seed.len()) {
            return Err(WalletError::Derivation(format!("seed must be 16-64 bytes, got {}", seed.len())));
        }
        let xpriv = Xpriv::new_master(NetworkKind::Main, seed).map_err(derivation_error)?;
        Ok(Self::from_xpriv(xpriv))
    }

    pub fn derive_child(&self, index: u32) -> Result<Self> {
        let child = [ChildNumber::from(index)];
        match &self.xpriv {
            Some(xpriv) => Ok(Self::from_xpriv(xpriv.derive_priv(secp(), &child).map_err(derivation_error)?)),
            None => {
                if child[0].is_hardened() {
                    return Err(WalletError::Derivation("hardened derivation needs a private key".into()));
                }
                let xpub = self.xpub.derive_pub(secp(), &child).map_err(derivation_error)?;
                Ok(Self { xpriv: None, xpub })
            }
        }
    }

    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self> {
        let indices = bip32::DerivationPath::from(path);
        match &self.xpriv {
            Some(xpriv) => Ok(Self::from_xpriv(xpriv.derive_priv(secp(), &indices).map_err(derivation_error)?)),
            None => {
                if path.indices().iter().any(|&i| is_hardened(i)) {
                    return Err(WalletError::Derivation("hardened derivation needs a private key".into()));
                }
                let xpub = self.xpub.derive_pub(secp(), &indices).map_err(derivation_error)?;
                Ok(Self { xpriv: None, xpub })
            }
        }
    }

    /// Drop the private key, keeping everything else.
    pub fn neuter(&self) -> Self {
        Self { xpriv: None, xpub: self.xpub }
    }

    pub fn identifier(&self) -> [u8; 20] {
        self.xpub.identifier().to_byte_array()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.xpub.fingerprint().to_bytes()
    }

    pub fn private_key(&self) -> Option<&SecretKey> {
        self.xpriv.as_ref().map(|x| &x.private_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.xpub.public_key
    }

    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.xpub.public_key.serialize()
    }

    pub fn chain_code(&self) -> [u8; 32] {
        self.xpub.chain_code.to_bytes()
    }

    pub fn parent_fingerprint(&self) -> Fingerprint {
        self.xpub.parent_fingerprint.to_bytes()
    }

    pub fn depth(&self) -> u8 {
        self.xpub.depth
    }

    pub fn child_number(&self) -> u32 {
        u32::from(self.xpub.child_number)
    }

    pub fn is_public_only(&self) -> bool {
        self.xpriv.is_none()
    }

    /// 78-byte serialization under `prefix` (private prefixes need a private key).
    pub fn to_extended(&self, prefix: KeyPrefix) -> Result<String> {
        let mut payload = if prefix.is_private() {
            self.xpriv
                .as_ref()
                .ok_or_else(|| WalletError::Derivation(format!("{} needs a private key", prefix.as_str())))?
                .encode()
        } else {
            self.xpub.encode()
        };
        payload[..4].copy_from_slice(&prefix.version());
        Ok(base58::encode_check(&payload))
    }

    /// Parse any BIP32 or SLIP132 extended key.
    pub fn from_extended(key: &str) -> Result<(Self, KeyPrefix)> {
        let (prefix, mut payload) = slip132::decode_extended(key)?;
        let depth = payload[4];
        if depth == 0 && (payload[5..13].iter().any(|&b| b != 0)) {
            return Err(WalletError::InvalidAccountKey("zero depth with non-zero parent or index".into()));
        }
        let invalid = |e: bip32::Error| WalletError::InvalidAccountKey(e.to_string());

        let node = if prefix.is_private() {
            if payload[45] != 0 {
                return Err(WalletError::InvalidAccountKey("private key data must start with 0x00".into()));
            }
            payload[..4].copy_from_slice(&XPRV_VERSION);
            Self::from_xpriv(Xpriv::decode(&payload).map_err(invalid)?)
        } else {
            payload[..4].copy_from_slice(&XPUB_VERSION);
            Self { xpriv: None, xpub: Xpub::decode(&payload).map_err(invalid)? }
        };
        Ok((node, prefix))
    }
}

impl std::fmt::Debug for HdNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdNode")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .field("has_private", &self.xpriv.is_some())
            .field("depth", &self.depth())
            .field("child_number", &self.child_number())
            .finish()
    }
}

/// Derive the node at `path` from a BIP39 seed.
pub fn derive_node(seed: &[u8], path: &DerivationPath) -> Result<HdNode> {
    HdNode::master(seed)?.derive_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::path::HARDENED;

    // BIP32 test vector 1
    const SEED_1: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn test_vector_1_master() {
        let seed = hex::decode(SEED_1).unwrap();
        let master = HdNode::master(&seed).unwrap();
        assert_eq!(
            master.to_extended(KeyPrefix::Xpub).unwrap(),
            "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"
        );
        assert_eq!(
            master.to_extended(KeyPrefix::Xprv).unwrap(),
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
        );
    }

    #[test]
    fn test_vector_1_chain() {
        let seed = hex::decode(SEED_1).unwrap();
        let path: DerivationPath = "m/0'/1/2'/2/1000000000".parse().unwrap();
        let node = derive_node(&seed, &path).unwrap();
        assert_eq!(
            node.to_extended(KeyPrefix::Xpub).unwrap(),
            "xpub6H1LXWLaKsWFhvm6RVpEL9P4KfRZSW7abD2ttkWP3SSQvnyA8FSVqNTEcYFgJS2UaFcxupHiYkro49S8yGasTvXEYBVPamhGW6cFJodrTHy"
        );
        // Stepwise derivation lands on the same node
        let stepwise = path
            .indices()
            .iter()
            .try_fold(HdNode::master(&seed).unwrap(), |n, &i| n.derive_child(i))
            .unwrap();
        assert_eq!(stepwise, node);
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let seed = hex::decode(SEED_1).unwrap();
        let account = derive_node(&seed, &DerivationPath::account(84, 0, 0)).unwrap();
        let from_private = account.derive_path(&"m/0/5".parse().unwrap()).unwrap();
        let from_public = account.neuter().derive_path(&"m/0/5".parse().unwrap()).unwrap();
        assert_eq!(from_private.public_key(), from_public.public_key());
        assert!(from_public.is_public_only());
        assert_eq!(from_private.fingerprint(), from_public.fingerprint());
        assert_eq!(from_private.parent_fingerprint(), from_public.parent_fingerprint());
    }

    #[test]
    fn test_public_node_cannot_harden() {
        let seed = hex::decode(SEED_1).unwrap();
        let xpub = HdNode::master(&seed).unwrap().neuter();
        assert!(matches!(xpub.derive_child(HARDENED), Err(WalletError::Derivation(_))));
        assert!(matches!(xpub.derive_path(&"m/0/1'".parse().unwrap()), Err(WalletError::Derivation(_))));
        assert!(xpub.to_extended(KeyPrefix::Xprv).is_err());
    }

    #[test]
    fn test_extended_round_trip() {
        let seed = hex::decode(SEED_1).unwrap();
        let node = derive_node(&seed, &"m/49'/0'/0'".parse().unwrap()).unwrap();
        let ypub = node.to_extended(KeyPrefix::Ypub).unwrap();
        assert!(ypub.starts_with("ypub"));
        let (parsed, prefix) = HdNode::from_extended(&ypub).unwrap();
        assert_eq!(prefix, KeyPrefix::Ypub);
        assert_eq!(parsed, node.neuter());

        let (private, _) = HdNode::from_extended(&node.to_extended(KeyPrefix::Xprv).unwrap()).unwrap();
        assert_eq!(private, node);
    }

    #[test]
    fn test_seed_length_checked() {
        assert!(HdNode::master(&[0u8; 8]).is_err());
        assert!(HdNode::master(&[0u8; 65]).is_err());
    }
}
