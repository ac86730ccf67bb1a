//! Keys - BIP39 mnemonics, BIP32 derivation and account-level key material.
//!
//! ```text
//! Mnemonic ──to_seed──► Seed ──HdNode::master──► m
//!                                                 │ m/purpose'/coin'/0'
//!                                                 ▼
//!                                           account node ──neuter──► account xpub
//!                                                 │ /change/index       │ /change/index
//!                                                 ▼                     ▼
//!                                          spending key          watch-only pubkey
//! ```

pub mod account;
pub mod bip32;
pub mod mnemonic;
pub mod path;

use bitcoin::secp256k1::{All, Secp256k1};
use std::sync::OnceLock;

pub use account::{derive_account_keys, derive_from_account_public_key, AccountKeys};
pub use bip32::{derive_node, Fingerprint, HdNode};
pub use mnemonic::{generate_mnemonic, validate_mnemonic, Mnemonic, Seed};
pub use path::{DerivationPath, HARDENED};

/// Shared signing/verification context; building one is expensive.
pub fn secp() -> &'static Secp256k1<All> {
    static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}
