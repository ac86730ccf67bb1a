//! Beewallet engine: self-custodial Bitcoin HD wallet. Seed in, signed transactions out.
//!
//! # Architecture
//!
//! ```text
//! Wallet (entry point)
//!   │
//!   ├── WalletRecord ──► KeyValueStore (memory / file / host secure store)
//!   │
//!   ├── keys      BIP39 mnemonic → BIP32 master → m/purpose'/coin'/0'
//!   ├── encoding  Base58Check, SLIP132 xpub/ypub/zpub conversion
//!   ├── address   P2PKH / P2SH-P2WPKH / P2WPKH encoders, AddressRecord
//!   │
//!   ├── chain     BlockchainClient (Esplora) → retry → admission gate → transport
//!   │
//!   ├── tx        coin selection → raw tx → BIP143 / legacy sighash → signatures
//!   └── psbt      BIP174 v0: create (xpub) → sign (seed) → finalize → extract
//! ```
//!
//! # Address types
//!
//! | Type | Purpose | Example (mainnet) |
//! |------|---------|-------------------|
//! | `legacy` | 44 | `1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA` |
//! | `segwit` | 49 | `37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf` |
//! | `bech32` | 84 | `bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu` |
//!
//! # Features
//!
//! - `native` (default) - reqwest HTTP transport, tracing subscriber, platform data dirs, CLI
//!
//! Without `native` the engine still derives, signs and handles PSBTs; the
//! host supplies a [`chain::Transport`].
//!
//! # Usage
//!
//! ```ignore
//! use beewallet_engine::{BlockchainClient, EngineConfig, Wallet};
//!
//! let config = EngineConfig::from_env()?;
//! let client = BlockchainClient::new(config.client.clone())?;
//! let mut wallet = Wallet::from_mnemonic(config, &words)?;
//!
//! wallet.refresh_usage(&client).await?;
//! let balance = wallet.balance(&client).await?;
//! let sent = wallet.send(&client, "bc1q...", 25_000, 2.0).await?;
//! ```

// =============================================================================
// Shared modules
// =============================================================================
pub mod address;
pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keys;
pub mod psbt;
pub mod runtime;
pub mod tx;
pub mod wallet;

// =============================================================================
// Native-only modules (CLI, log subscriber)
// =============================================================================
#[cfg(feature = "native")]
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================
pub use address::{address_to_script, validate_address, AddressRecord, AddressType};
pub use chain::{AddressStats, Balance, BlockchainClient, Direction, TxHistoryEntry, Utxo};
pub use config::{ClientConfig, EngineConfig, Network};
pub use encoding::{convert_extended_key, KeyPrefix};
pub use error::{ErrorKind, Result, WalletError};
pub use keys::{
    derive_account_keys, derive_from_account_public_key, generate_mnemonic, validate_mnemonic, AccountKeys,
    DerivationPath, HdNode, Mnemonic,
};
pub use psbt::{parse_psbt_details, Psbt, PsbtDetails, PsbtState, WatchOnlyAccount};
pub use runtime::{install_signal_handlers, Shutdown};
pub use tx::{select_coins, SignedTransaction, TransactionPlan};
pub use wallet::{FileStore, KeyValueStore, MemoryStore, Wallet, WalletMode, WalletRecord};
